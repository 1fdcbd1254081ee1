use std::fmt;

use crate::ProtocolError;

const SEPARATOR: &str = "::";

/// Describes a file announced by an offer or start frame, `"<size>::<name>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub size: u64,
    pub name: String,
}

impl TransferDescriptor {
    pub fn new(size: u64, name: impl Into<String>) -> Self {
        Self { size, name: name.into() }
    }

    // a descriptor without a separator is a bare byte count
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = String::from_utf8_lossy(payload);
        let (count, name) = text.split_once(SEPARATOR).unwrap_or((&*text, ""));

        let size = count
            .trim()
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidTransferSize(text.to_string()))?;

        Ok(Self::new(size, name))
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for TransferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.size, SEPARATOR, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_and_name() {
        let d = TransferDescriptor::parse(b"5000::report.txt").unwrap();
        assert_eq!(d, TransferDescriptor::new(5000, "report.txt"));
        assert_eq!(d.to_payload(), b"5000::report.txt");
    }

    #[test]
    fn test_name_may_contain_separator() {
        let d = TransferDescriptor::parse(b"12::a::b").unwrap();
        assert_eq!(d.size, 12);
        assert_eq!(d.name, "a::b");
    }

    #[test]
    fn test_bare_count() {
        let d = TransferDescriptor::parse(b"42").unwrap();
        assert_eq!(d, TransferDescriptor::new(42, ""));
    }

    #[test]
    fn test_unparseable_count() {
        assert!(matches!(
            TransferDescriptor::parse(b"lots::big.iso"),
            Err(ProtocolError::InvalidTransferSize(s)) if s == "lots::big.iso"
        ));
        assert!(TransferDescriptor::parse(b"-5::neg").is_err());
        assert!(TransferDescriptor::parse(b"").is_err());
    }
}
