use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};
use zbus::zvariant::Type;

use crate::error::PortalError;

/// A single permission bit a document can grant an app.
///
/// Encoded on the wire and in `GrantPermissions`/`RevokePermissions` as the
/// lowercase strings below; persisted as the OR of the bit values.
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Read = 1 << 0,
    Write = 1 << 1,
    GrantPermissions = 1 << 2,
}

impl Permission {
    fn from_token(token: &str) -> Result<Self, PortalError> {
        match token {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "grant-permissions" => Ok(Self::GrantPermissions),
            other => Err(PortalError::InvalidArgument(format!(
                "unknown permission `{other}`"
            ))),
        }
    }

    fn as_token(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::GrantPermissions => "grant-permissions",
        }
    }
}

/// Parses the `as` permission-token arrays accepted by GrantPermissions/
/// RevokePermissions into a bitflag set.
pub fn parse_permissions(tokens: &[String]) -> Result<BitFlags<Permission>, PortalError> {
    let mut bits = BitFlags::empty();
    for token in tokens {
        bits |= Permission::from_token(token)?;
    }
    Ok(bits)
}

pub fn permission_tokens(bits: BitFlags<Permission>) -> Vec<String> {
    bits.iter().map(|p| p.as_token().to_owned()).collect()
}

/// Wire type for a permission stored on a document: `(app_id, perms)`, where
/// `perms` is the OR of the bit values, matching the on-disk `array<(su)>` cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, Default)]
pub struct PermissionBits(pub u32);

impl From<BitFlags<Permission>> for PermissionBits {
    fn from(value: BitFlags<Permission>) -> Self {
        Self(value.bits())
    }
}

impl From<PermissionBits> for BitFlags<Permission> {
    fn from(value: PermissionBits) -> Self {
        BitFlags::from_bits_truncate(value.0)
    }
}
