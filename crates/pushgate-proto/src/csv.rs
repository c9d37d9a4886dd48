//! Notification CSV payload.
//!
//! Push providers cap payloads at a few kilobytes, so a device's pending
//! signals are packed as one line per notification:
//!
//! ```text
//! base64(message_hash),base64(identity_fingerprint)\n
//! ```
//!
//! The payload travels under [`NOTIFICATION_DATA_KEY`] in the provider's data
//! dictionary. Standard base64 never contains `,` or `\n`, so no quoting is
//! needed.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::errors::{ProtocolError, Result};

/// Key the CSV payload is stored under in provider data payloads.
pub const NOTIFICATION_DATA_KEY: &str = "notificationData";

/// Length of a message hash in bytes.
pub const MESSAGE_HASH_LEN: usize = 32;

/// Length of an identity fingerprint in bytes.
pub const IDENTITY_FINGERPRINT_LEN: usize = 25;

/// Encoded length of one line holding a full-size hash and fingerprint.
///
/// A payload budget smaller than this cannot carry a single notification.
pub const MAX_LINE_LEN: usize =
    base64_len(MESSAGE_HASH_LEN) + 1 + base64_len(IDENTITY_FINGERPRINT_LEN) + 1;

const fn base64_len(bytes: usize) -> usize {
    bytes.div_ceil(3) * 4
}

/// Anything that can be written as one CSV line.
pub trait CsvEntry {
    /// Hash of the pending message.
    fn message_hash(&self) -> &[u8];
    /// Fingerprint of the identity the message is for.
    fn identity_fingerprint(&self) -> &[u8];
}

/// One decoded CSV line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedNotification {
    /// Hash of the pending message
    pub message_hash: Vec<u8>,
    /// Fingerprint of the identity the message is for
    pub identity_fingerprint: Vec<u8>,
}

fn encode_line<T: CsvEntry>(entry: &T) -> String {
    let mut line = STANDARD.encode(entry.message_hash());
    line.push(',');
    line.push_str(&STANDARD.encode(entry.identity_fingerprint()));
    line.push('\n');
    line
}

/// Pack entries into a CSV payload of at most `max_len` bytes.
///
/// Entries are written in order until the next line would not fit; that
/// entry and everything after it are returned unwritten so the caller can
/// retry them later. Order is preserved in both halves.
pub fn build_notification_csv<T: CsvEntry>(entries: Vec<T>, max_len: usize) -> (String, Vec<T>) {
    let mut csv = String::new();
    let mut entries = entries.into_iter();
    let mut rest = Vec::new();

    for entry in entries.by_ref() {
        let line = encode_line(&entry);
        if csv.len() + line.len() > max_len {
            rest.push(entry);
            break;
        }
        csv.push_str(&line);
    }

    rest.extend(entries);
    (csv, rest)
}

/// Parse a CSV payload back into its entries.
///
/// Empty input decodes to an empty list; a trailing newline is optional.
///
/// # Errors
///
/// `InvalidCsv` if a line lacks exactly one separator or either column is not
/// valid base64.
pub fn decode_notification_csv(csv: &str) -> Result<Vec<DecodedNotification>> {
    csv.lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(index, line)| {
            let invalid = |reason: String| ProtocolError::InvalidCsv { line: index + 1, reason };

            let mut columns = line.split(',');
            let (Some(hash), Some(fingerprint), None) =
                (columns.next(), columns.next(), columns.next())
            else {
                return Err(invalid("expected 2 columns".to_string()));
            };

            Ok(DecodedNotification {
                message_hash: STANDARD
                    .decode(hash)
                    .map_err(|e| invalid(format!("message hash: {e}")))?,
                identity_fingerprint: STANDARD
                    .decode(fingerprint)
                    .map_err(|e| invalid(format!("identity fingerprint: {e}")))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::NotificationData;

    fn data(hash: &[u8], fingerprint: &[u8]) -> NotificationData {
        NotificationData {
            ephemeral_id: 0,
            identity_fingerprint: fingerprint.to_vec(),
            message_hash: hash.to_vec(),
        }
    }

    #[test]
    fn csv_layout() {
        let (csv, rest) =
            build_notification_csv(vec![data(&[1, 2, 3], &[4, 5, 6]), data(b"hi", b"yo")], 4096);

        assert!(rest.is_empty());
        insta::assert_snapshot!(csv, @r"
        AQID,BAUG
        aGk=,eW8=
        ");
    }

    #[test]
    fn overflow_is_returned_in_order() {
        // Each line is "AQID,BAUG\n" = 10 bytes
        let entries: Vec<_> = (0..5u8).map(|i| data(&[1, 2, 3], &[4, 5, i])).collect();

        let (csv, rest) = build_notification_csv(entries, 25);

        assert_eq!(csv.lines().count(), 2);
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].identity_fingerprint, vec![4, 5, 2]);
        assert_eq!(rest[2].identity_fingerprint, vec![4, 5, 4]);
    }

    #[test]
    fn nothing_fits_in_tiny_budget() {
        let (csv, rest) = build_notification_csv(vec![data(&[1; 32], &[2; 25])], 8);
        assert!(csv.is_empty());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn full_size_line_fits_exactly_max_line_len() {
        let entry = data(&[0xff; MESSAGE_HASH_LEN], &[0xff; IDENTITY_FINGERPRINT_LEN]);
        assert_eq!(MAX_LINE_LEN, 82);

        let (csv, rest) = build_notification_csv(vec![entry.clone()], MAX_LINE_LEN);
        assert_eq!(csv.len(), MAX_LINE_LEN);
        assert!(rest.is_empty());

        let (csv, rest) = build_notification_csv(vec![entry], MAX_LINE_LEN - 1);
        assert!(csv.is_empty());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn decode_reads_what_build_wrote() {
        let entries = vec![data(&[9; 32], &[8; 25]), data(&[7; 32], &[6; 25])];
        let (csv, _) = build_notification_csv(entries.clone(), 4096);

        let decoded = decode_notification_csv(&csv).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].message_hash, entries[0].message_hash);
        assert_eq!(decoded[1].identity_fingerprint, entries[1].identity_fingerprint);
    }

    #[test]
    fn decode_rejects_bad_lines() {
        assert!(matches!(
            decode_notification_csv("AQID\n"),
            Err(ProtocolError::InvalidCsv { line: 1, .. })
        ));
        assert!(matches!(
            decode_notification_csv("AQID,BAUG\nAQID,BAUG,AQID\n"),
            Err(ProtocolError::InvalidCsv { line: 2, .. })
        ));
        assert!(matches!(
            decode_notification_csv("!!!,BAUG"),
            Err(ProtocolError::InvalidCsv { line: 1, .. })
        ));
    }

    #[test]
    fn decode_empty_payload() {
        assert!(decode_notification_csv("").unwrap().is_empty());
    }

    proptest::proptest! {
        /// Packing never exceeds the budget and never loses or reorders entries.
        #[test]
        fn prop_build_respects_budget(
            sizes in proptest::collection::vec((1usize..64, 1usize..64), 0..40),
            max_len in 0usize..2048,
        ) {
            let entries: Vec<_> = sizes
                .iter()
                .enumerate()
                .map(|(i, (h, f))| NotificationData {
                    ephemeral_id: i as i64,
                    identity_fingerprint: vec![0x5a; *f],
                    message_hash: vec![0xa5; *h],
                })
                .collect();

            let (csv, rest) = build_notification_csv(entries.clone(), max_len);
            proptest::prop_assert!(csv.len() <= max_len);

            let written = csv.lines().count();
            proptest::prop_assert_eq!(written + rest.len(), entries.len());
            for (offset, entry) in rest.iter().enumerate() {
                proptest::prop_assert_eq!(entry.ephemeral_id, (written + offset) as i64);
            }
        }
    }
}
