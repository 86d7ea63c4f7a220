//! Typed registry of replicated tables.
//!
//! The original deployment interpolated table names into query strings at
//! runtime; here the set is a closed enumeration so an unsupported table is
//! an error at capture time, not a formatting bug mid-cycle.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The closed set of replicated clinic tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Patients,
    Appointments,
    MedicalRecords,
    Prescriptions,
}

impl Table {
    /// All replicated tables, in sync order.
    pub const ALL: [Table; 5] = [
        Table::Users,
        Table::Patients,
        Table::Appointments,
        Table::MedicalRecords,
        Table::Prescriptions,
    ];

    /// SQL-level table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Patients => "patients",
            Self::Appointments => "appointments",
            Self::MedicalRecords => "medical_records",
            Self::Prescriptions => "prescriptions",
        }
    }

    /// Primary-key field within the payload.
    #[must_use]
    pub const fn primary_key(self) -> &'static str {
        // Every clinic table keys on "id"; kept per-table so a future
        // composite-keyed table changes one arm, not the engine.
        match self {
            Self::Users
            | Self::Patients
            | Self::Appointments
            | Self::MedicalRecords
            | Self::Prescriptions => "id",
        }
    }

    /// Payload schema version expected for this table.
    ///
    /// Captured payloads carry this tag so a schema change is detected and
    /// rejected instead of silently misapplied.
    #[must_use]
    pub const fn schema_version(self) -> u32 {
        match self {
            Self::Users
            | Self::Patients
            | Self::Appointments
            | Self::MedicalRecords
            | Self::Prescriptions => 1,
        }
    }

    /// Look up a table by its SQL name.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name)
            .ok_or_else(|| Error::TableNotRegistered {
                table: name.to_string(),
            })
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
