//! The two RPC verbs of the smart HTTP protocol

use crate::Error;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    /// Subcommand passed to the `git` binary
    pub fn subcommand(&self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    pub fn request_content_type(&self) -> String {
        format!("application/x-{}-request", self.as_str())
    }

    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.as_str())
    }

    /// Pushing mutates refs; fetching only reads them.
    pub fn is_write(&self) -> bool {
        matches!(self, Service::ReceivePack)
    }
}

impl FromStr for Service {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(Service::UploadPack),
            "git-receive-pack" => Ok(Service::ReceivePack),
            other => Err(Error::UnknownService(other.to_string())),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_services() {
        assert_eq!("git-upload-pack".parse::<Service>().unwrap(), Service::UploadPack);
        assert_eq!("git-receive-pack".parse::<Service>().unwrap(), Service::ReceivePack);
    }

    #[test]
    fn test_reject_unknown_service() {
        for bad in ["git-received-pack", "upload-pack", "", "GIT-UPLOAD-PACK"] {
            let err = bad.parse::<Service>().unwrap_err();
            assert!(matches!(err, Error::UnknownService(ref s) if s == bad));
        }
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            Service::UploadPack.advertisement_content_type(),
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(
            Service::ReceivePack.result_content_type(),
            "application/x-git-receive-pack-result"
        );
        assert_eq!(
            Service::ReceivePack.request_content_type(),
            "application/x-git-receive-pack-request"
        );
    }
}
