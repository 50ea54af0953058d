//! Contract documents for a single booking.

use chrono::NaiveDateTime;

use crate::model::*;

/// Shown for any blank field.
pub const PLACEHOLDER: &str = "—";

const GENERATED_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Turns one booking record into a printable document. Rendering never
/// fails; missing values are shown as [`PLACEHOLDER`].
pub trait ContractRenderer: Send + Sync {
    fn render(&self, record: &ReportRecord, generated_at: NaiveDateTime) -> Vec<u8>;

    /// Suggested download name for slot `n`'s contract.
    fn file_name(&self, n: SlotNumber) -> String;

    fn content_type(&self) -> &'static str;
}

/// Single-page HTML contract form. The printed field set and labels are
/// fixed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlContractRenderer;

const STYLE: &str = "\
.form-card{background:#fff;padding:25px;border-radius:12px;width:90%;margin:auto;}
.form-header{background:#1e40af;color:#fff;padding:12px;text-align:center;font-size:24px;}
.form-table{width:100%;border-collapse:collapse;margin-top:15px;}
.form-table td{border:1px solid #d6d6d6;padding:9px;}
.label-cell{font-weight:600;background:#f3f4f6;}
.print-footer{margin-top:10px;color:#555;}";

impl HtmlContractRenderer {
    /// Label / value pairs in print order. Values are raw, not yet escaped.
    pub fn fields(record: &ReportRecord) -> Vec<(&'static str, String)> {
        let b = &record.booking;
        let billboard = if b.billboard_id.trim().is_empty() {
            record.slot_number.to_string()
        } else {
            b.billboard_id.clone()
        };
        let opt = |v: Option<String>| v.unwrap_or_default();
        vec![
            ("Billboard Number", billboard),
            ("Client Name", b.client_name.clone()),
            ("Company Name", b.company_name.clone()),
            ("Location", b.location.clone()),
            ("Billboard Size", b.size.clone()),
            ("Start Date", b.start_date.clone()),
            ("End Date", b.end_date.clone()),
            ("Rent Amount (PKR)", opt(b.rent.map(fmt_money))),
            ("Advance Received (PKR)", opt(b.advance.map(fmt_money))),
            ("Balance (PKR)", opt(b.balance.map(fmt_money))),
            ("Payment Status", opt(b.payment_status.map(|s| s.to_string()))),
            ("Contract Status", opt(b.contract_status.map(|s| s.to_string()))),
            ("Remarks", b.notes.clone()),
        ]
    }
}

impl ContractRenderer for HtmlContractRenderer {
    fn render(&self, record: &ReportRecord, generated_at: NaiveDateTime) -> Vec<u8> {
        let mut html = String::with_capacity(2048);
        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!(
            "<title>Billboard {} Contract</title>\n",
            record.slot_number
        ));
        html.push_str("<style>\n");
        html.push_str(STYLE);
        html.push_str("\n</style>\n</head>\n<body>\n");
        html.push_str("<div class=\"form-card\">\n");
        html.push_str("<div class=\"form-header\">Billboard Contract Form</div>\n");
        html.push_str("<table class=\"form-table\">\n");
        for (label, value) in Self::fields(record) {
            let shown = if value.trim().is_empty() {
                PLACEHOLDER.to_string()
            } else {
                escape_html(&value)
            };
            html.push_str(&format!(
                "<tr><td class=\"label-cell\">{label}</td><td>{shown}</td></tr>\n"
            ));
        }
        html.push_str("</table>\n");
        html.push_str(&format!(
            "<div class=\"print-footer\">Generated on: {}</div>\n",
            generated_at.format(GENERATED_FORMAT)
        ));
        html.push_str("</div>\n</body>\n</html>\n");
        html.into_bytes()
    }

    fn file_name(&self, n: SlotNumber) -> String {
        format!("Billboard_{n}_Contract.html")
    }

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Whole-unit amount with comma thousands separators: `1250000.4` → `1,250,000`.
pub fn fmt_money(v: f64) -> String {
    let rounded = v.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    let lead = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
