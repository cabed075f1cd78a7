//! JSON Lines listing formatter

use super::{listing_lines, ListingFormatter};
use crate::{AddressSpace, ResourcerError, Session};

impl ListingFormatter for super::JsonLinesFormatter {
    fn format(&self, session: &Session, space: AddressSpace) -> Result<String, ResourcerError> {
        let mut output = String::new();
        for info in listing_lines(session, space) {
            output.push_str(&serde_json::to_string(&info)?);
            output.push('\n');
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_session;
    use super::super::JsonLinesFormatter;
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_json_lines_listing() {
        let s = sample_session();
        let output = JsonLinesFormatter.format(&s, AddressSpace::Rom).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0]["kind"], "code");
        assert_eq!(lines[0]["details"], "LDA #$01");
        assert_eq!(lines[0]["bytes"], serde_json::json!([0xA9, 0x01]));
        assert_eq!(lines[2]["address"], 3);
        assert_eq!(lines[3]["kind"], "comment");
        assert_eq!(lines[6]["line"], 6);
    }
}
