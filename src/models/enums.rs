use serde::{Deserialize, Serialize};

use super::DocumentError;

/// Generate an enum with `as_str` and `FromStr` over fixed wire names.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DocumentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DocumentError::InvalidEnum {
                        field: stringify!($name),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(CodeSystem {
    Icd10 => "icd10",
    Cpt => "cpt",
    Hcpcs => "hcpcs",
});

str_enum!(CodeCategory {
    Icd => "icd",
    Cpt => "cpt",
    Hcpcs => "hcpcs",
    Prescription => "prescription",
    PrescriptionCpt => "prescription_cpt",
    PrescriptionHcpcs => "prescription_hcpcs",
});

impl CodeCategory {
    pub const ALL: [CodeCategory; 6] = [
        Self::Icd,
        Self::Cpt,
        Self::Hcpcs,
        Self::Prescription,
        Self::PrescriptionCpt,
        Self::PrescriptionHcpcs,
    ];

    /// Question prefixed to the diagnosis (or prescription) text.
    pub fn prompt_prefix(&self) -> &'static str {
        match self {
            Self::Icd => "What are the ICD codes for this diagnosis? ",
            Self::Cpt => "What are the CPT codes for this diagnosis? ",
            Self::Hcpcs => "What are the HCPCS codes for this diagnosis? ",
            Self::Prescription => "What medication to prescribe for the diagnosis? ",
            Self::PrescriptionCpt => "What are the CPT codes for these prescriptions? ",
            Self::PrescriptionHcpcs => "What are the HCPCS codes for these prescriptions? ",
        }
    }

    /// Code system whose tokens this category's reply is mined for.
    /// CPT and HCPCS share a lexical shape, so the category is the only
    /// thing that tells them apart.
    pub fn code_system(&self) -> Option<CodeSystem> {
        match self {
            Self::Icd => Some(CodeSystem::Icd10),
            Self::Cpt | Self::PrescriptionCpt => Some(CodeSystem::Cpt),
            Self::Hcpcs | Self::PrescriptionHcpcs => Some(CodeSystem::Hcpcs),
            Self::Prescription => None,
        }
    }
}
