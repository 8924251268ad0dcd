//! Small shared helpers

use chrono::{DateTime, Utc};

/// Formats a timestamp as a PDF date string (`D:YYYYMMDDHHmmSSZ`).
pub fn pdf_date(dt: &DateTime<Utc>) -> String {
    format!("D:{}Z", dt.format("%Y%m%d%H%M%S"))
}

/// Last path component of a filename, tolerating both separator styles.
pub fn last_path_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pdf_date_shape() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        assert_eq!(pdf_date(&dt), "D:20240301123045Z");
    }

    #[test]
    fn strips_directories() {
        assert_eq!(last_path_component("a/b/report.docx"), "report.docx");
        assert_eq!(last_path_component("c:\\mail\\invoice.pdf"), "invoice.pdf");
        assert_eq!(last_path_component("plain.txt"), "plain.txt");
    }
}
