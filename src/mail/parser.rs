//! RFC 822/MIME parsing into the cache's `Header`/`Body`/`Part` types.
//!
//! Date normalization follows `original_source/src/util.cpp`'s
//! `MailtimeToTimet` exactly: interpret the message's date-time fields as
//! if they were already UTC, then subtract the zone offset in seconds.
//! This is plain correct epoch conversion, but pinned here rather than
//! delegated to `mail-parser`'s own timestamp helper so the arithmetic
//! matches the reference implementation bit for bit.

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::cache::{Body, Flags, Header, Part};

/// Interpret a parsed MIME date as UTC epoch seconds via the
/// `t -= offs_h*3600 + offs_m*60` correction (spec §4.3).
pub fn normalize_date(dt: &mail_parser::DateTime) -> i64 {
    use chrono::{NaiveDate, NaiveTime};

    let Some(date) = NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32) else {
        return 0;
    };
    let Some(time) = NaiveTime::from_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32) else {
        return 0;
    };
    let naive_as_utc = date.and_time(time).and_utc().timestamp();

    let offset_secs = (dt.tz_hour as i64) * 3600 + (dt.tz_minute as i64) * 60;
    let offset_secs = if dt.tz_before_gmt { -offset_secs } else { offset_secs };

    naive_as_utc - offset_secs
}

/// Formats an epoch-seconds timestamp as the sortable `dates`-file key
/// `DateIndex` uses (spec §3: ordered stably by server date across
/// sessions). RFC 3339 sorts lexicographically in date order, so the
/// `BTreeMap` backing `DateIndex` stays date-ordered without extra work.
pub fn date_index_key(epoch_secs: i64) -> String {
    use chrono::DateTime;
    DateTime::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

/// Parses headers out of a raw RFC 822 message. Returns `None` if the
/// message cannot be parsed at all or is missing a usable `From`.
pub fn parse_header(uid: u32, raw: &[u8]) -> Option<Header> {
    let message = match MessageParser::default().parse(raw) {
        Some(msg) => msg,
        None => {
            tracing::warn!("failed to parse message uid={uid} ({} bytes)", raw.len());
            return None;
        }
    };

    let from = message.from().and_then(|f| f.first())?;
    let from_addr = from.address()?.to_string();
    let from_name = from.name().map(str::to_string);
    let from = match from_name {
        Some(name) => format!("{name} <{from_addr}>"),
        None => from_addr,
    };

    let to = message
        .to()
        .map(|addrs| addrs.iter().filter_map(|a| a.address()).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    let cc = message
        .cc()
        .map(|addrs| addrs.iter().filter_map(|a| a.address()).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();
    let bcc = message
        .bcc()
        .map(|addrs| addrs.iter().filter_map(|a| a.address()).collect::<Vec<_>>().join(", "))
        .unwrap_or_default();

    let subject = message.subject().unwrap_or_default().to_string();
    let date = message.date().map(normalize_date).unwrap_or(0);
    let message_id = message.message_id().map(str::to_string);
    let in_reply_to = message
        .in_reply_to()
        .as_text_list()
        .and_then(|ids| ids.first().map(|s| s.to_string()));

    Some(Header {
        from,
        to,
        cc,
        bcc,
        subject,
        date,
        message_id,
        in_reply_to,
    })
}

/// Parses the displayable body plus part list out of a raw RFC 822
/// message.
pub fn parse_body(raw: &[u8]) -> Body {
    let Some(message) = MessageParser::default().parse(raw) else {
        return Body::default();
    };

    let text = message.text_bodies().find_map(|p| match &p.body {
        PartType::Text(t) => Some(t.to_string()),
        _ => None,
    });
    let html = message.html_bodies().find_map(|p| match &p.body {
        PartType::Html(h) => Some(h.to_string()),
        _ => None,
    });

    let parts = message
        .attachments()
        .enumerate()
        .map(|(index, part)| {
            let filename = part.attachment_name().map(str::to_string);
            let content_type = part
                .content_type()
                .map(|ct| format!("{}/{}", ct.ctype(), ct.subtype().unwrap_or("octet-stream")))
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let size = match &part.body {
                PartType::Binary(data) => data.len(),
                PartType::Text(data) => data.len(),
                PartType::Html(data) => data.len(),
                _ => 0,
            };
            Part {
                index,
                content_type,
                filename,
                size,
            }
        })
        .collect();

    Body { text, html, parts }
}

/// Extracts the raw bytes of one attachment part by index, for
/// `Request::FetchAttachment`.
pub fn extract_attachment_data(raw: &[u8], index: usize) -> Option<Vec<u8>> {
    let message = MessageParser::default().parse(raw)?;
    let part = message.attachments().nth(index)?;
    match &part.body {
        PartType::Binary(data) => Some(data.to_vec()),
        PartType::Text(data) => Some(data.as_bytes().to_vec()),
        PartType::Html(data) => Some(data.as_bytes().to_vec()),
        _ => None,
    }
}

pub fn parse_flags_from_imap(flags: &[async_imap::types::Flag<'_>]) -> Flags {
    let mut result = Flags::empty();
    for flag in flags {
        match flag {
            async_imap::types::Flag::Seen => result |= Flags::SEEN,
            async_imap::types::Flag::Answered => result |= Flags::ANSWERED,
            async_imap::types::Flag::Flagged => result |= Flags::FLAGGED,
            async_imap::types::Flag::Deleted => result |= Flags::DELETED,
            async_imap::types::Flag::Draft => result |= Flags::DRAFT,
            _ => {}
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"From: Sender <sender@example.com>\r\n\
        To: recipient@example.com\r\n\
        Subject: Test Email\r\n\
        Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n\
        Message-ID: <test@example.com>\r\n\
        \r\n\
        Hello, this is a test email.";

    #[test]
    fn parses_header_fields() {
        let header = parse_header(1, SAMPLE).unwrap();
        assert_eq!(header.subject, "Test Email");
        assert!(header.from.contains("sender@example.com"));
        assert_eq!(header.message_id.as_deref(), Some("<test@example.com>"));
    }

    #[test]
    fn parses_text_body() {
        let body = parse_body(SAMPLE);
        assert!(body.text.unwrap().contains("Hello"));
        assert!(body.parts.is_empty());
    }

    #[test]
    fn positive_offset_is_subtracted() {
        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: x\r\n\
            Date: Mon, 1 Jan 2024 12:00:00 +0500\r\n\r\nbody";
        let header = parse_header(1, raw).unwrap();
        // 12:00 local at +05:00 is 07:00 UTC.
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(header.date, expected);
    }

    #[test]
    fn negative_offset_is_added_back() {
        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: x\r\n\
            Date: Mon, 1 Jan 2024 12:00:00 -0500\r\n\r\nbody";
        let header = parse_header(1, raw).unwrap();
        let expected = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(17, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(header.date, expected);
    }

    #[test]
    fn missing_from_is_none() {
        let raw = b"Subject: no sender\r\n\r\nbody";
        assert!(parse_header(1, raw).is_none());
    }

    #[test]
    fn date_index_key_sorts_lexicographically_in_date_order() {
        let earlier = date_index_key(1_700_000_000);
        let later = date_index_key(1_700_000_100);
        assert!(earlier < later);
    }
}
