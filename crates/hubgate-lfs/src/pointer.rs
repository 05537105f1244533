//! LFS pointers: an object is named by its SHA-256 and byte size

use crate::{LfsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    pub oid: String,
    pub size: i64,
}

impl Pointer {
    pub fn new(oid: impl Into<String>, size: i64) -> Self {
        Self {
            oid: oid.into(),
            size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_oid(&self.oid)?;
        if self.size < 0 {
            return Err(LfsError::InvalidSize(self.size.to_string()));
        }
        Ok(())
    }

    /// Size of a pointer that already passed [`Pointer::validate`]
    pub fn byte_size(&self) -> u64 {
        self.size.max(0) as u64
    }
}

/// An oid is exactly 64 lowercase hex digits.
pub fn validate_oid(oid: &str) -> Result<()> {
    let well_formed = oid.len() == 64
        && oid.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(LfsError::InvalidOid(oid.to_string()))
    }
}

/// Sharded location of an object: `ab/cd/ef01...` for oid `abcdef01...`
pub fn oid_relative_path(oid: &str) -> Result<String> {
    validate_oid(oid)?;
    Ok(format!("{}/{}/{}", &oid[0..2], &oid[2..4], &oid[4..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OID: &str = "4d7a214614ab2935c943f9e0ff69d22eadbb8f32b1258daaa5e2ca24d17e2393";

    #[test]
    fn test_valid_pointer() {
        let pointer = Pointer::new(OID, 12345);
        assert!(pointer.validate().is_ok());
        assert_eq!(pointer.byte_size(), 12345);
        assert!(Pointer::new(OID, 0).validate().is_ok());
    }

    #[test]
    fn test_invalid_pointers() {
        assert!(matches!(Pointer::new("abc", 10).validate(), Err(LfsError::InvalidOid(_))));
        assert!(matches!(
            Pointer::new(OID.to_uppercase(), 10).validate(),
            Err(LfsError::InvalidOid(_))
        ));
        assert!(matches!(Pointer::new(OID, -1).validate(), Err(LfsError::InvalidSize(_))));
    }

    #[test]
    fn test_relative_path() {
        let path = oid_relative_path(OID).unwrap();
        assert_eq!(path, format!("4d/7a/{}", &OID[4..]));
        assert!(oid_relative_path("../../etc/passwd").is_err());
    }
}
