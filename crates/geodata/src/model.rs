use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a textual value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Case category facet.
    Category {
        Abuse => "abuse",
        Stray => "stray",
        Missing => "missing",
        Injured => "injured",
        Zoonotic => "zoonotic",
        DeadAnimal => "dead_animal",
        DangerousDog => "dangerous_dog",
        Distress => "distress",
        IllegalSales => "illegal_sales",
        Wildlife => "wildlife",
        NoiseNuisance => "noise_nuisance",
    }
);

string_enum!(
    /// Case status facet.
    Status {
        Pending => "pending",
        Verified => "verified",
        InProgress => "in_progress",
        Resolved => "resolved",
        Rejected => "rejected",
        Archived => "archived",
    }
);

string_enum!(
    /// Point-of-interest layer.
    PoiType {
        GovernmentOffice => "government_office",
        AnimalShelter => "animal_shelter",
        VetClinic => "vet_clinic",
    }
);

string_enum!(VetSubtype {
    Standard => "standard",
    Emergency => "emergency",
    Hours24 => "hours_24",
});

string_enum!(UrgencyLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

string_enum!(AnimalType {
    Dog => "dog",
    Cat => "cat",
    Bird => "bird",
    Other => "other",
});

string_enum!(JurisdictionLevel {
    Country => "country",
    State => "state",
    Municipality => "municipality",
    Delegacion => "delegacion",
    Locality => "locality",
});

string_enum!(
    /// What a timeline entry records. Unknown actions are rejected at the
    /// boundary so new kinds surface as a compile-time change here.
    EventKind {
        Created => "created",
        Verified => "verified",
        Rejected => "rejected",
        StatusChanged => "status_changed",
        Assigned => "assigned",
        Escalated => "escalated",
        GovernmentResponse => "government_response",
        Comment => "comment",
        MediaAdded => "media_added",
        Flagged => "flagged",
        Resolved => "resolved",
        Archived => "archived",
        MarkedUnresponsive => "marked_unresponsive",
    }
);
