//! Header synonym table + CSV-to-record mapping.

use normly_core::{CanonicalRecord, Channel};
use tracing::debug;

/// Canonical fields a sheet column can be reconciled into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    Id,
    Customer,
    Product,
    Mobile,
    Email,
    Contact,
    Status,
    Time,
    Response,
}

/// Accepted header spellings per field, lowercase with single spaces.
///
/// Order matters: a header listed under several fields (`number`, `contact`)
/// belongs to the first one.
pub const HEADER_SYNONYMS: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::Id,
        &["id", "no", "s.no", "sr no", "serial number", "sno", "number", "sl no"],
    ),
    (
        CanonicalField::Customer,
        &[
            "org name",
            "organization",
            "customer",
            "client",
            "customer name",
            "name",
            "company",
            "brand",
            "party",
        ],
    ),
    (
        CanonicalField::Product,
        &["product", "item", "service", "product name", "project", "plan"],
    ),
    (
        CanonicalField::Mobile,
        &[
            "mobile",
            "phone",
            "contact",
            "mobile number",
            "number",
            "phone number",
            "tel",
            "whatsapp",
            "mobile_no",
        ],
    ),
    (
        CanonicalField::Email,
        &["email", "email id", "email_id", "mail", "email address"],
    ),
    (
        CanonicalField::Contact,
        &[
            "contact person",
            "contact_person",
            "person",
            "representative",
            "owner",
            "manager",
        ],
    ),
    (
        CanonicalField::Status,
        &["status", "state", "condition", "progress", "outcome"],
    ),
    (
        CanonicalField::Time,
        &[
            "scheduled_date",
            "time",
            "date",
            "last update",
            "last_update",
            "timestamp",
            "updated at",
            "slot",
            "time_slot",
            "tss expiry date",
            "expiry",
        ],
    ),
    (
        CanonicalField::Response,
        &[
            "customer response",
            "response",
            "analysis",
            "conclusion",
            "result",
            "feedback",
        ],
    ),
];

/// Lowercase, trim and collapse inner whitespace.
pub fn normalize_header(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn canonical_field_for_header(header: &str) -> Option<CanonicalField> {
    let needle = normalize_header(header);
    HEADER_SYNONYMS
        .iter()
        .find(|(_, spellings)| spellings.contains(&needle.as_str()))
        .map(|(field, _)| *field)
}

/// Split one CSV line on commas that sit outside quotes, then clean every cell.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quotes_seen = 0usize;

    for ch in line.chars() {
        match ch {
            '"' => {
                quotes_seen += 1;
                current.push(ch);
            }
            ',' if quotes_seen % 2 == 0 => {
                fields.push(clean_cell(&current));
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(clean_cell(&current));
    fields
}

fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('"').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('"').unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Per-word title case: `in PROGRESS` becomes `In Progress`.
pub fn title_case_status(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    let mut out = String::new();
                    out.extend(first.to_uppercase());
                    out.push_str(&chars.as_str().to_lowercase());
                    out
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A header as `extra` keys it, plus the canonical field it maps to.
type HeaderSlot = (String, Option<CanonicalField>);

fn map_row(headers: &[HeaderSlot], cells: &[String], row_index: usize) -> CanonicalRecord {
    let mut record = CanonicalRecord::with_defaults(row_index);

    for ((header, field), value) in headers.iter().zip(cells.iter()) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        record.extra.insert(header.clone(), value.to_string());

        let value = value.to_string();
        match field {
            Some(CanonicalField::Id) => record.id = value,
            Some(CanonicalField::Customer) => record.customer = value,
            Some(CanonicalField::Product) => record.product = value,
            Some(CanonicalField::Mobile) => record.mobile = Some(value),
            Some(CanonicalField::Email) => record.email = Some(value),
            Some(CanonicalField::Contact) => record.contact = Some(value),
            Some(CanonicalField::Status) => record.status = title_case_status(&value),
            Some(CanonicalField::Time) => record.time = value,
            Some(CanonicalField::Response) => record.response = Some(value),
            None => {}
        }
    }

    // Mobile wins over email regardless of column order.
    record.channel = if record.mobile.is_some() {
        Channel::Voice
    } else if record.email.is_some() {
        Channel::Email
    } else {
        Channel::Voice
    };
    record
}

/// Map a header row plus data rows into canonical records.
///
/// Rows without a customer-like value are dropped.
pub fn map_rows(header_row: &[String], data_rows: &[Vec<String>]) -> Vec<CanonicalRecord> {
    let headers = header_row
        .iter()
        .map(|h| (h.trim().to_lowercase(), canonical_field_for_header(h)))
        .collect::<Vec<_>>();

    let records = data_rows
        .iter()
        .enumerate()
        .map(|(index, cells)| map_row(&headers, cells, index))
        .collect::<Vec<_>>();
    let total = records.len();
    let kept = records
        .into_iter()
        .filter(CanonicalRecord::has_customer)
        .collect::<Vec<_>>();
    if kept.len() < total {
        debug!(dropped = total - kept.len(), kept = kept.len(), "dropped rows without a customer");
    }
    kept
}

/// Parse a CSV export body. Fewer than two non-blank lines yields no records.
pub fn map_csv_text(text: &str) -> Vec<CanonicalRecord> {
    let lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    let Some((header_line, data_lines)) = lines.split_first() else {
        return Vec::new();
    };
    if data_lines.is_empty() {
        return Vec::new();
    }

    let headers = split_csv_line(header_line);
    let rows = data_lines
        .iter()
        .map(|line| split_csv_line(line))
        .collect::<Vec<_>>();
    map_rows(&headers, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn every_synonym_resolves_to_its_first_listed_field() {
        for (field, spellings) in HEADER_SYNONYMS {
            for spelling in *spellings {
                let resolved = canonical_field_for_header(spelling).unwrap();
                let first_owner = HEADER_SYNONYMS
                    .iter()
                    .find(|(_, s)| s.contains(spelling))
                    .map(|(f, _)| *f)
                    .unwrap();
                assert_eq!(resolved, first_owner, "{spelling}");
                if resolved != *field {
                    assert!(matches!(*spelling, "number" | "contact"), "{spelling}");
                }
            }
        }
    }

    #[test]
    fn header_matching_ignores_case_and_spacing() {
        assert_eq!(canonical_field_for_header("  ORG   Name "), Some(CanonicalField::Customer));
        assert_eq!(canonical_field_for_header("Mobile Number"), Some(CanonicalField::Mobile));
        assert_eq!(canonical_field_for_header("Email ID"), Some(CanonicalField::Email));
        assert_eq!(canonical_field_for_header("Favourite Colour"), None);
    }

    #[test]
    fn split_keeps_commas_inside_quotes() {
        let cells = split_csv_line(r#"T9, "Acme, Inc." ,"Widgets",  done "#);
        assert_eq!(cells, strings(&["T9", "Acme, Inc.", "Widgets", "done"]));
    }

    #[test]
    fn split_handles_trailing_empty_cell() {
        assert_eq!(split_csv_line("a,b,"), strings(&["a", "b", ""]));
    }

    #[test]
    fn status_is_title_cased_per_word() {
        assert_eq!(title_case_status("in   PROGRESS"), "In Progress");
        assert_eq!(title_case_status("done"), "Done");
        assert_eq!(title_case_status("awaiting call-back"), "Awaiting Call-back");
    }

    #[test]
    fn maps_org_name_and_mobile_into_voice_record() {
        let records = map_csv_text("Org Name,Mobile Number\nAcme Corp,9998887777");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.customer, "Acme Corp");
        assert_eq!(record.mobile.as_deref(), Some("9998887777"));
        assert_eq!(record.channel, Channel::Voice);
        assert_eq!(record.status, "Pending");
        assert_eq!(record.time, "Just now");
        assert_eq!(record.id, "T1");
        assert_eq!(record.product, "General Inquiry");
        assert_eq!(record.extra.get("org name").map(String::as_str), Some("Acme Corp"));
        assert_eq!(record.extra.get("mobile number").map(String::as_str), Some("9998887777"));
    }

    #[test]
    fn mobile_takes_precedence_over_email_in_any_column_order() {
        let email_first = map_csv_text("Client,Email,Phone\nBlue Sky,ops@bluesky.test,88888");
        let mobile_first = map_csv_text("Client,Phone,Email\nBlue Sky,88888,ops@bluesky.test");
        assert_eq!(email_first[0].channel, Channel::Voice);
        assert_eq!(mobile_first[0].channel, Channel::Voice);
    }

    #[test]
    fn email_only_rows_use_email_channel() {
        let records = map_csv_text("Company,Mail\nZenith Hub,hello@zenith.test\nMatrix Soft,");
        assert_eq!(records[0].channel, Channel::Email);
        assert_eq!(records[1].channel, Channel::Voice);
        assert_eq!(records[1].email, None);
    }

    #[test]
    fn rows_without_customer_are_dropped() {
        let records = map_csv_text("Customer,Status\nAcme,done\n,pending\nGlobal Tech,FAILED");
        let customers = records.iter().map(|r| r.customer.as_str()).collect::<Vec<_>>();
        assert_eq!(customers, vec!["Acme", "Global Tech"]);
        assert_eq!(records[1].status, "Failed");
        // Positional ids keep the original row index.
        assert_eq!(records[1].id, "T3");
    }

    #[test]
    fn sheets_without_customer_column_yield_nothing() {
        assert!(map_csv_text("Product,Status\nWidgets,Done").is_empty());
    }

    #[test]
    fn fewer_than_two_lines_yield_zero_records() {
        assert!(map_csv_text("").is_empty());
        assert!(map_csv_text("Org Name,Mobile\n\n   \n").is_empty());
    }

    #[test]
    fn explicit_id_and_crlf_line_endings() {
        let records = map_csv_text("S.No,Party,Plan,Slot\r\nCUST-88,Acme Corp,Gold,10:30 AM\r\n");
        assert_eq!(records[0].id, "CUST-88");
        assert_eq!(records[0].product, "Gold");
        assert_eq!(records[0].time, "10:30 AM");
    }

    #[test]
    fn map_rows_accepts_pre_split_cells() {
        let headers = strings(&["Brand", "Contact Person", "Feedback", "Notes"]);
        let rows = vec![strings(&["FitFuel", "Riya", "Interested", "call back"])];
        let records = map_rows(&headers, &rows);
        assert_eq!(records[0].customer, "FitFuel");
        assert_eq!(records[0].contact.as_deref(), Some("Riya"));
        assert_eq!(records[0].response.as_deref(), Some("Interested"));
        assert_eq!(records[0].extra.get("notes").map(String::as_str), Some("call back"));
    }

    #[test]
    fn map_rows_trims_cells_and_drops_blank_customers() {
        let headers = strings(&["Customer", "Phone"]);
        let rows = vec![strings(&["   ", " 123 "]), strings(&[" Acme ", " 456 "])];
        let records = map_rows(&headers, &rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].customer, "Acme");
        assert_eq!(records[0].mobile.as_deref(), Some("456"));
        assert_eq!(records[0].extra.get("phone").map(String::as_str), Some("456"));
    }

    #[test]
    fn extra_keeps_inner_header_spacing() {
        let headers = strings(&[" Org  Name ", "Notes"]);
        let rows = vec![strings(&["Acme Corp", "VIP"])];
        let records = map_rows(&headers, &rows);
        assert_eq!(records[0].customer, "Acme Corp");
        let keys = records[0].extra.keys().map(String::as_str).collect::<Vec<_>>();
        assert_eq!(keys, vec!["notes", "org  name"]);
    }
}
