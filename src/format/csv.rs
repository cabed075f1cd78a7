//! CSV listing formatter

use serde::Serialize;

use super::{hex_bytes, listing_lines, ListingFormatter};
use crate::{AddressSpace, RegionKind, ResourcerError, Session};

#[derive(Serialize)]
struct CsvRow {
    line: u64,
    address: String,
    kind: RegionKind,
    bytes: String,
    details: String,
    comment: String,
}

impl ListingFormatter for super::CsvFormatter {
    fn format(&self, session: &Session, space: AddressSpace) -> Result<String, ResourcerError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for info in listing_lines(session, space) {
            writer.serialize(CsvRow {
                line: info.line,
                address: format!("{:06X}", info.address),
                kind: info.kind,
                bytes: hex_bytes(&info.bytes),
                details: info.details,
                comment: info.comment,
            })?;
        }
        let data = writer
            .into_inner()
            .map_err(|e| ResourcerError::Generic(format!("CSV flush error: {}", e)))?;
        String::from_utf8(data)
            .map_err(|e| ResourcerError::Generic(format!("CSV encoding error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_session;
    use super::super::CsvFormatter;
    use super::*;

    #[test]
    fn test_csv_listing() {
        let s = sample_session();
        let output = CsvFormatter.format(&s, AddressSpace::Rom).unwrap();
        let mut reader = csv::Reader::from_reader(output.as_bytes());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            ["line", "address", "kind", "bytes", "details", "comment"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 7);
        assert_eq!(&rows[0][1], "000000");
        assert_eq!(&rows[0][2], "code");
        assert_eq!(&rows[0][4], "LDA #$01");
        // quoting survives the round trip
        assert_eq!(&rows[2][4], "db \"Hi\",$00");
        assert_eq!(&rows[3][5], "padding");
        assert_eq!(&rows[6][2], "unknown");
    }
}
