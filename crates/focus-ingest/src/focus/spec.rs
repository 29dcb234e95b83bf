//! Fixed FOCUS enumerations and field sets
//!
//! Every enum carries its exact wire spelling. Parsing is case-sensitive:
//! normalization of provider aliases happens in the mappers, never here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// FOCUS specification version the canonical records follow
pub const FOCUS_VERSION: &str = "1.2";

macro_rules! focus_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }

            /// Whether `value` is an exact member of this enumeration
            pub fn is_valid(value: &str) -> bool {
                value.parse::<$name>().is_ok()
            }
        }

        impl FromStr for $name {
            type Err = UnknownEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownEnumValue {
                        enumeration: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Value outside a fixed FOCUS enumeration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {enumeration}")]
pub struct UnknownEnumValue {
    pub enumeration: &'static str,
    pub value: String,
}

focus_enum! {
    /// Service category, listed in classification precedence order
    ServiceCategory {
        AiAndMachineLearning => "AI and Machine Learning",
        Analytics => "Analytics",
        Compute => "Compute",
        Databases => "Databases",
        DeveloperTools => "Developer Tools",
        ManagementAndGovernance => "Management and Governance",
        Networking => "Networking",
        Security => "Security, Identity, and Compliance",
        Storage => "Storage",
        Other => "Other",
    }
}

focus_enum! {
    ChargeCategory {
        Usage => "Usage",
        Purchase => "Purchase",
        Tax => "Tax",
        Credit => "Credit",
        Adjustment => "Adjustment",
    }
}

focus_enum! {
    ChargeClass {
        Correction => "Correction",
    }
}

focus_enum! {
    CommitmentDiscountStatus {
        Used => "Used",
        Unused => "Unused",
    }
}

focus_enum! {
    ChargeFrequency {
        OneTime => "One-Time",
        Recurring => "Recurring",
        UsageBased => "Usage-Based",
    }
}

/// Canonical column names a FOCUS export must carry
pub const MANDATORY_COLUMNS: &[&str] = &[
    "BilledCost",
    "EffectiveCost",
    "ListCost",
    "ContractedCost",
    "BillingAccountId",
    "BillingAccountType",
    "BillingCurrency",
    "ServiceName",
    "ServiceCategory",
    "ProviderName",
    "PublisherName",
    "InvoiceIssuerName",
    "ChargeCategory",
    "ChargeDescription",
];

/// Canonical period columns
pub const DATE_COLUMNS: &[&str] = &[
    "ChargePeriodStart",
    "ChargePeriodEnd",
    "BillingPeriodStart",
    "BillingPeriodEnd",
];

/// Provider-specific columns carry this prefix
pub const EXTENSION_PREFIX: &str = "x_";

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for category in ServiceCategory::ALL {
            assert_eq!(category.as_str().parse::<ServiceCategory>().unwrap(), *category);
        }
        assert_eq!(ChargeFrequency::UsageBased.to_string(), "Usage-Based");
    }

    #[test]
    fn test_membership_is_case_sensitive() {
        assert!(ChargeCategory::is_valid("Usage"));
        assert!(!ChargeCategory::is_valid("usage"));
        assert!(!ChargeClass::is_valid("Database"));
        assert!(!CommitmentDiscountStatus::is_valid("Active"));
    }

    #[test]
    fn test_unknown_value_error_names_enumeration() {
        let err = "Refund".parse::<ChargeCategory>().unwrap_err();
        assert_eq!(err.enumeration, "ChargeCategory");
        assert_eq!(err.to_string(), "'Refund' is not a valid ChargeCategory");
    }

    #[test]
    fn test_serde_uses_wire_spelling() {
        let json = serde_json::to_string(&ServiceCategory::Security).unwrap();
        assert_eq!(json, "\"Security, Identity, and Compliance\"");
    }

    #[test]
    fn test_field_sets_have_expected_sizes() {
        assert_eq!(MANDATORY_COLUMNS.len(), 14);
        assert_eq!(DATE_COLUMNS.len(), 4);
    }
}
