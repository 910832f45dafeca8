//! Search, kind toggles and ordering, applied after projection

use std::cmp::Ordering;

use crate::model::{Record, RecordKind};
use crate::projector::ViewRecord;

/// Which records a view shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFilter {
    /// Case-insensitive substring of the body
    pub search: Option<String>,
    pub show_annotations: bool,
    pub show_notes: bool,
    /// Also show any record flagged as containing a URL
    pub urls_only: bool,
}

impl Default for ViewFilter {
    fn default() -> Self {
        Self {
            search: None,
            show_annotations: true,
            show_notes: true,
            urls_only: false,
        }
    }
}

impl ViewFilter {
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() {
            None
        } else {
            Some(search)
        };
        self
    }

    pub fn notes_only() -> Self {
        Self {
            show_annotations: false,
            ..Self::default()
        }
    }

    pub fn annotations_only() -> Self {
        Self {
            show_notes: false,
            ..Self::default()
        }
    }

    pub fn urls_only() -> Self {
        Self {
            show_annotations: false,
            show_notes: false,
            urls_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(search) = &self.search {
            if !record.body.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }

        (self.show_annotations && record.kind == RecordKind::Annotation)
            || (self.show_notes && record.kind == RecordKind::Note)
            || (self.urls_only && record.contains_url)
    }

    pub fn apply(&self, view: Vec<ViewRecord>) -> Vec<ViewRecord> {
        view.into_iter().filter(|v| self.matches(&v.record)).collect()
    }
}

/// Record ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Location start, then kind, then capture time
    #[default]
    Location,
    /// Page (records without one last), then location order
    Page,
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "location" => Ok(SortKey::Location),
            "page" => Ok(SortKey::Page),
            other => Err(format!("unknown sort key: {other}")),
        }
    }
}

fn by_location(a: &Record, b: &Record) -> Ordering {
    a.location
        .start
        .cmp(&b.location.start)
        .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
        .then_with(|| a.captured_at.cmp(&b.captured_at))
}

fn by_page(a: &Record, b: &Record) -> Ordering {
    let page_order = match (a.page, b.page) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    page_order.then_with(|| by_location(a, b))
}

pub fn compare(a: &Record, b: &Record, key: SortKey) -> Ordering {
    match key {
        SortKey::Location => by_location(a, b),
        SortKey::Page => by_page(a, b),
    }
}

/// Stable sort of raw records
pub fn sort_records(records: &mut [Record], key: SortKey) {
    records.sort_by(|a, b| compare(a, b, key));
}

/// Stable sort of projected records
pub fn sort_view(view: &mut [ViewRecord], key: SortKey) {
    view.sort_by(|a, b| compare(&a.record, &b.record, key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;
    use chrono::{TimeZone, Utc};

    fn rec(id: &str, body: &str, kind: RecordKind, start: i64) -> Record {
        Record::new(id, body, kind, Location::open(start))
    }

    #[test]
    fn search_is_case_insensitive() {
        let filter = ViewFilter::default().with_search("RUST");
        assert!(filter.matches(&rec("a", "Learning rust daily", RecordKind::Note, 0)));
        assert!(!filter.matches(&rec("b", "nothing here", RecordKind::Note, 0)));
    }

    #[test]
    fn blank_search_is_ignored() {
        assert_eq!(ViewFilter::default().with_search("   ").search, None);
    }

    #[test]
    fn kind_toggles() {
        let note = rec("n", "x", RecordKind::Note, 0);
        let annotation = rec("a", "x", RecordKind::Annotation, 0);
        let link = rec("l", "x", RecordKind::Annotation, 0).with_contains_url(true);

        let notes = ViewFilter::notes_only();
        assert!(notes.matches(&note));
        assert!(!notes.matches(&annotation));

        let urls = ViewFilter::urls_only();
        assert!(urls.matches(&link));
        assert!(!urls.matches(&annotation));
        assert!(!urls.matches(&note));
    }

    #[test]
    fn location_order_breaks_ties_on_kind_then_time() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut records = vec![
            rec("n", "x", RecordKind::Note, 5),
            rec("a2", "x", RecordKind::Annotation, 5).with_captured_at(late),
            rec("a1", "x", RecordKind::Annotation, 5).with_captured_at(early),
            rec("first", "x", RecordKind::Note, 1),
        ];
        sort_records(&mut records, SortKey::Location);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "a1", "a2", "n"]);
    }

    #[test]
    fn page_order_puts_missing_pages_last() {
        let mut records = vec![
            rec("none", "x", RecordKind::Note, 0),
            rec("p9", "x", RecordKind::Note, 0).with_page(9),
            rec("p2", "x", RecordKind::Note, 50).with_page(2),
        ];
        sort_records(&mut records, SortKey::Page);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p9", "none"]);
    }

    #[test]
    fn sort_key_parses() {
        assert_eq!("Page".parse::<SortKey>(), Ok(SortKey::Page));
        assert!("title".parse::<SortKey>().is_err());
    }
}
