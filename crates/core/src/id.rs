//! Strongly-typed identifiers used across the domain.
//!
//! Every identifier is a UUID newtype. Domain crates declare their own
//! document identifiers with [`uuid_newtype!`](crate::uuid_newtype) so that a
//! `ProductId` can never be passed where a `WarehouseId` is expected.

/// Declare a UUID-backed identifier newtype.
///
/// The generated type is `Copy`, hashable, serializes transparently and
/// parses from its string form, reporting failures as
/// [`DomainError::InvalidId`](crate::DomainError::InvalidId).
#[macro_export]
macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t($crate::Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self($crate::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: $crate::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &$crate::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$crate::Uuid> for $t {
            fn from(value: $crate::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for $crate::Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = <$crate::Uuid as core::str::FromStr>::from_str(s)
                    .map_err(|e| $crate::DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of a company (the multi-tenant boundary).
    CompanyId,
    "CompanyId"
);
uuid_newtype!(
    /// Identifier of a user (actor identity).
    UserId,
    "UserId"
);
uuid_newtype!(
    /// Identifier of a company branch.
    BranchId,
    "BranchId"
);
uuid_newtype!(ProductId, "ProductId");
uuid_newtype!(WarehouseId, "WarehouseId");
uuid_newtype!(
    /// Identifier of a unit of measure.
    UnitId,
    "UnitId"
);
uuid_newtype!(CustomerId, "CustomerId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_form() {
        let id = ProductId::new();
        let parsed: ProductId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_malformed_id_with_type_name() {
        let err = "not-a-uuid".parse::<WarehouseId>().unwrap_err();
        match err {
            crate::DomainError::InvalidId(msg) => assert!(msg.starts_with("WarehouseId")),
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn serializes_transparently() {
        let uuid = crate::Uuid::now_v7();
        let id = CompanyId::from_uuid(uuid);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(uuid.to_string()));
    }
}
