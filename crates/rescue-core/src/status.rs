//! Lifecycle status enums and their legal transitions.
//!
//! Every status is stored as lowercase text in the durable store and sent with
//! the same spelling on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Stored and wire representation.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("invalid ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

text_enum!(
    /// Trip request lifecycle.
    TripRequestStatus {
        /// Open for bids.
        Pending => "pending",
        /// A trip was confirmed for this request.
        Accepted => "accepted",
        /// Withdrawn by the rider.
        Cancelled => "cancelled",
    }
);

text_enum!(
    /// Driver response (bid or decline) lifecycle.
    ResponseStatus {
        /// Active bid awaiting the rider.
        Pending => "pending",
        /// The driver declined the request.
        Declined => "declined",
        /// The rider accepted this bid.
        Accepted => "accepted",
        /// The bid lost or was turned down.
        Rejected => "rejected",
    }
);

text_enum!(
    /// Ongoing trip lifecycle.
    TripStatus {
        /// In progress.
        Ongoing => "ongoing",
        /// Finished normally.
        Completed => "completed",
        /// Abandoned.
        Cancelled => "cancelled",
    }
);

text_enum!(
    /// Notification read state, mutable only by its recipient.
    NotificationStatus {
        /// Not yet seen.
        Unread => "unread",
        /// Seen.
        Read => "read",
        /// Acted on positively.
        Accepted => "accepted",
        /// Acted on negatively.
        Rejected => "rejected",
    }
);

text_enum!(
    /// What a notification records.
    NotificationKind {
        /// A driver submitted a bid.
        Bid => "bid",
        /// Either party proposed a different amount.
        CounterOffer => "counter_offer",
        /// The rider accepted a driver's bid.
        RiderAcceptedBid => "rider_accepted_bid",
    }
);

impl TripRequestStatus {
    /// Whether the request still accepts bids and declines.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl ResponseStatus {
    /// Responses only move forward: out of `pending`, or from `accepted` to
    /// `rejected` when another driver wins or the driver withdraws.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Declined | Self::Accepted | Self::Rejected)
                | (Self::Accepted, Self::Rejected)
        )
    }
}

impl TripStatus {
    /// Completed and cancelled trips never change again.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}
