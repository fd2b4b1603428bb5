use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use url::Url;

/// Render a watermark the way the `$filter` clause expects it:
/// `2021-03-31T10:15:00.000Z`.
pub fn format_watermark(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the first request of a change feed.
///
/// Generates: `<base>/<resource>?$select=*&$expand=A,B&$filter=<field> ge <watermark>`
pub fn build_change_url(
    base_url: &str,
    resource: &str,
    select: Option<&str>,
    expand: Option<&str>,
    filter_field: &str,
    since: DateTime<Utc>,
) -> Result<Url, url::ParseError> {
    let mut url = resource_url(base_url, resource)?;
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(select) = select {
            pairs.append_pair("$select", select);
        }
        if let Some(expand) = expand {
            pairs.append_pair("$expand", expand);
        }
        pairs.append_pair(
            "$filter",
            &format!("{filter_field} ge {}", format_watermark(since)),
        );
    }
    Ok(url)
}

/// `<base>/<resource>`, tolerant of stray slashes on either side.
pub fn resource_url(base_url: &str, resource: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        resource.trim_start_matches('/')
    ))
}

/// Turn a `__next` cursor into a URL callable against `base_url`.
///
/// SP10 returns cursors rooted at its own `/api/` path; everything up to and
/// including that segment is dropped and the rest is appended to the base.
pub fn rewrite_next(base_url: &str, next: &str) -> Option<String> {
    let next = next.trim();
    if next.is_empty() {
        return None;
    }

    // Absolute cursors keep only their path and query.
    let relative = match Url::parse(next) {
        Ok(abs) => match abs.query() {
            Some(q) => format!("{}?{q}", abs.path()),
            None => abs.path().to_string(),
        },
        Err(_) => next.to_string(),
    };

    let tail = match relative.find("/api/") {
        Some(idx) => &relative[idx + "/api/".len()..],
        None => relative.trim_start_matches('/'),
    };

    Some(format!("{}/{tail}", base_url.trim_end_matches('/')))
}

/// Parse a `__clock` value such as `/Date(2021-03-31-10-15-00)/`.
///
/// Exactly six numeric components (year, month, day, hour, minute, second) in UTC
/// are required; anything else yields `None`.
pub fn parse_clock(raw: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<u32> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;

    let &[year, month, day, hour, minute, second] = parts.as_slice() else {
        return None;
    };

    Utc.with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn clock_with_date_wrapper() {
        let parsed = parse_clock("/Date(2021-03-31-10-15-00)/").unwrap();
        assert_eq!(format_watermark(parsed), "2021-03-31T10:15:00.000Z");
    }

    #[test]
    fn clock_plain_components() {
        assert_eq!(
            parse_clock("2020-12-05 08:00:09"),
            Some(ts(2020, 12, 5, 8, 0, 9))
        );
    }

    #[test]
    fn clock_rejects_wrong_component_count() {
        assert!(parse_clock("2021-03-31").is_none());
        assert!(parse_clock("2021-03-31-10-15-00-123").is_none());
        assert!(parse_clock("").is_none());
    }

    #[test]
    fn clock_rejects_impossible_dates() {
        assert!(parse_clock("2021-13-31-10-15-00").is_none());
        assert!(parse_clock("2021-02-30-10-15-00").is_none());
    }

    #[test]
    fn change_url_embeds_filter() {
        let url = build_change_url(
            "http://sp10.test/service/api/",
            "Appointment",
            Some("*"),
            Some("AppointmentStatus,AssignedTech,Order"),
            "LastUpdatedDateTime",
            ts(2021, 3, 31, 10, 15, 0),
        )
        .unwrap();

        assert_eq!(url.path(), "/service/api/Appointment");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("$select".to_string(), "*".to_string()),
                (
                    "$expand".to_string(),
                    "AppointmentStatus,AssignedTech,Order".to_string()
                ),
                (
                    "$filter".to_string(),
                    "LastUpdatedDateTime ge 2021-03-31T10:15:00.000Z".to_string()
                ),
            ]
        );
    }

    #[test]
    fn change_url_without_select_or_expand() {
        let url = build_change_url(
            "http://sp10.test",
            "Appointment/Deleted",
            None,
            None,
            "DeletedDateTime",
            ts(2021, 1, 1, 0, 0, 0),
        )
        .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "$filter");
    }

    #[test]
    fn next_cursor_strips_api_prefix() {
        assert_eq!(
            rewrite_next("http://sp10.test/service/api/", "/api/Appointment?$skiptoken=20")
                .as_deref(),
            Some("http://sp10.test/service/api/Appointment?$skiptoken=20")
        );
    }

    #[test]
    fn next_cursor_absolute_url() {
        assert_eq!(
            rewrite_next(
                "http://local.test:9000",
                "https://servicepro10.com/service/api/Order?$skiptoken=40"
            )
            .as_deref(),
            Some("http://local.test:9000/Order?$skiptoken=40")
        );
    }

    #[test]
    fn next_cursor_without_api_segment() {
        assert_eq!(
            rewrite_next("http://sp10.test", "/OrderNote?page=2").as_deref(),
            Some("http://sp10.test/OrderNote?page=2")
        );
    }

    #[test]
    fn blank_next_cursor_ends_paging() {
        assert!(rewrite_next("http://sp10.test", "  ").is_none());
    }
}
