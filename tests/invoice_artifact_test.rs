//! Invoice artifact tests: rendering, write-once close, and round-trip
//! parsing of the delimited output.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use usage_billing::error::BillingError;
use usage_billing::models::invoice::display_amount;
use usage_billing::models::{BillingWindow, Invoice};

fn window() -> BillingWindow {
    BillingWindow::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

/// Build an invoice the way a billing run does: per-resource id line,
/// metadata rows, the service header, rated lines, subtotal, separator.
fn build_invoice() -> Invoice {
    let mut invoice = Invoice::new("acme", window());

    invoice.add_line("vm", vec!["vm-1".into()]).unwrap();
    invoice
        .add_line("vm", vec!["name:".into(), "type:".into()])
        .unwrap();
    invoice
        .add_line("vm", vec!["web-1".into(), "vm".into()])
        .unwrap();
    invoice
        .add_line(
            "vm",
            vec!["service:".into(), "usage:".into(), "rate:".into(), "cost:".into()],
        )
        .unwrap();
    invoice
        .add_line(
            "vm",
            vec!["bandwidth-out".into(), "100".into(), "0.02".into(), "2.00".into()],
        )
        .unwrap();
    invoice
        .add_line("vm", vec!["total cost:".into(), "2.00".into()])
        .unwrap();
    invoice.add_line("vm", vec![]).unwrap();
    invoice.add_subtotal(dec!(2.00)).unwrap();

    invoice.add_line("volume", vec!["vol-9".into()]).unwrap();
    invoice
        .add_line(
            "volume",
            vec!["service:".into(), "usage:".into(), "rate:".into(), "cost:".into()],
        )
        .unwrap();
    invoice
        .add_line(
            "volume",
            vec!["volume.size".into(), "30".into(), "0.0005".into(), "0.02".into()],
        )
        .unwrap();
    invoice
        .add_line("volume", vec!["total cost:".into(), "0.02".into()])
        .unwrap();
    invoice.add_line("volume", vec![]).unwrap();
    invoice.add_subtotal(dec!(0.015)).unwrap();

    invoice
}

#[test]
fn close_writes_header_groups_and_total() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acme.csv");

    let mut invoice = build_invoice();
    invoice.close(&path).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<Vec<&str>> = contents.lines().map(|l| l.split(',').collect()).collect();

    assert_eq!(rows[0], vec!["", "from", "until"]);
    assert_eq!(
        rows[1],
        vec!["usage range:", "2026-03-01T00:00:00", "2026-04-01T00:00:00"]
    );
    assert_eq!(rows[2], vec![""]);

    // Grand total: 2.00 + 0.015 = 2.015, rounded once to 2.02. Rounding
    // the volume subtotal first (0.02) would have given 2.02 here too, so
    // assert on the exact running total as well.
    assert_eq!(invoice.total(), dec!(2.015));
    let total_row = rows
        .iter()
        .find(|r| r.first() == Some(&"invoice total cost:"))
        .expect("total row present");
    assert_eq!(total_row[1], "2.02");
}

#[test]
fn artifact_round_trips_groups_lines_and_total() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acme.csv");

    let mut invoice = build_invoice();
    let written_groups: Vec<(String, Vec<Vec<String>>)> = invoice
        .groups()
        .iter()
        .map(|g| (g.resource_type.clone(), g.lines.clone()))
        .collect();
    let written_total = display_amount(invoice.total());
    invoice.close(&path).unwrap();

    // Parse the artifact back: skip the two header rows and a blank, then
    // split on the blank separator rows written after each group.
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    let body = &lines[3..];

    let mut parsed_groups: Vec<Vec<Vec<String>>> = Vec::new();
    let mut current: Vec<Vec<String>> = Vec::new();
    let mut total: Option<Decimal> = None;
    for line in body {
        if let Some(raw) = line.strip_prefix("invoice total cost:,") {
            total = Some(raw.parse().unwrap());
            break;
        }
        if line.is_empty() {
            if !current.is_empty() {
                parsed_groups.push(std::mem::take(&mut current));
            }
            continue;
        }
        current.push(line.split(',').map(str::to_string).collect());
    }

    assert_eq!(parsed_groups.len(), written_groups.len());
    for (parsed, (_, written)) in parsed_groups.iter().zip(&written_groups) {
        // The trailing empty row of each group collapses into the group
        // separator; every non-empty line survives verbatim.
        let written_nonempty: Vec<&Vec<String>> =
            written.iter().filter(|l| !l.is_empty()).collect();
        assert_eq!(parsed.len(), written_nonempty.len());
        for (p, w) in parsed.iter().zip(written_nonempty) {
            assert_eq!(&p, &w);
        }
    }
    assert_eq!(total, Some(written_total));
}

#[test]
fn close_is_write_once_and_freezes_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acme.csv");

    let mut invoice = build_invoice();
    invoice.close(&path).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    assert!(matches!(invoice.close(&path), Err(BillingError::InvoiceClosed)));
    assert!(matches!(
        invoice.add_line("vm", vec!["late".into()]),
        Err(BillingError::InvoiceClosed)
    ));
    assert!(matches!(
        invoice.add_subtotal(dec!(1)),
        Err(BillingError::InvoiceClosed)
    ));

    // No partial rewrite happened.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
}
