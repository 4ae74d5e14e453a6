//! User identity: roles, participants, and bound identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{DriverId, RiderId};

/// The two kinds of account that can bind a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Vehicle operator who bids on trip requests.
    Driver,
    /// Customer who requests trips.
    Rider,
}

impl Role {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Rider => "rider",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(Self::Driver),
            "rider" => Ok(Self::Rider),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A user as addressed by the connection registry.
///
/// Drivers and riders live in separate tables with independent ID spaces, so
/// a user is only unique as the pair `(role, id)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    /// Account kind.
    pub role: Role,
    /// Raw account ID within that kind.
    pub id: i64,
}

impl Participant {
    /// Address a driver.
    pub const fn driver(id: DriverId) -> Self {
        Self {
            role: Role::Driver,
            id: id.get(),
        }
    }

    /// Address a rider.
    pub const fn rider(id: RiderId) -> Self {
        Self {
            role: Role::Rider,
            id: id.get(),
        }
    }

    /// The driver ID, if this participant is a driver.
    pub const fn as_driver(self) -> Option<DriverId> {
        match self.role {
            Role::Driver => Some(DriverId::new(self.id)),
            Role::Rider => None,
        }
    }

    /// The rider ID, if this participant is a rider.
    pub const fn as_rider(self) -> Option<RiderId> {
        match self.role {
            Role::Rider => Some(RiderId::new(self.id)),
            Role::Driver => None,
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

/// A validated identity, as asserted by the auth collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Who the user is.
    pub participant: Participant,
    /// Display name.
    pub name: String,
    /// Contact email, if the credential carries one.
    pub email: Option<String>,
    /// Contact mobile number, if the credential carries one.
    pub mobile: Option<String>,
}

impl Identity {
    /// Build an identity with only a name.
    pub fn new(participant: Participant, name: impl Into<String>) -> Self {
        Self {
            participant,
            name: name.into(),
            email: None,
            mobile: None,
        }
    }

    /// Role shortcut.
    pub const fn role(&self) -> Role {
        self.participant.role
    }
}
