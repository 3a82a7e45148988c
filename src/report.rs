//! Audit pack generation: JSON, LaTeX, and PDF reports.

use std::path::Path;

use printpdf::{BuiltinFont, Mm, PdfDocument};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ResultExt as _};
use crate::ledger::AuthenticityLedger;
use crate::model::{Alert, ScanEntry};
use crate::query::Stats;
use crate::util;

pub const AUDIT_PACK_FORMAT: &str = "MedLedger audit-pack v1";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditManifest {
    pub format: String,
    pub generated_at_utc: String,
    pub software: String,
    pub chain_length: usize,
    pub head_hash: String,
    pub integrity_ok: bool,
    pub stats: Stats,
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Audit pack writer
// ---------------------------------------------------------------------------

/// Write `manifest.json`, `chain.json`, `alerts.json`, `audit_report.tex`
/// and `audit_report.pdf` into `out_dir`.
pub fn write_audit_pack<L: AuthenticityLedger + ?Sized>(
    out_dir: &Path,
    ledger: &L,
) -> Result<AuditManifest> {
    std::fs::create_dir_all(out_dir)
        .ctx_report(&format!("create out dir {}", out_dir.display()))?;

    let integrity_ok = ledger.verify_integrity();
    let mut notes = vec!["Offline audit pack: JSON + LaTeX + PDF.".to_string()];
    if !integrity_ok {
        notes.push("WARNING: block chain failed integrity verification.".to_string());
    }
    let manifest = AuditManifest {
        format: AUDIT_PACK_FORMAT.to_string(),
        generated_at_utc: util::now_utc_rfc3339(),
        software: util::version_string(),
        chain_length: ledger.chain_len(),
        head_hash: ledger
            .blocks()
            .last()
            .map(|b| b.hash.clone())
            .unwrap_or_default(),
        integrity_ok,
        stats: ledger.stats(),
        notes,
    };

    write_json(&out_dir.join("manifest.json"), &manifest)?;
    write_json(&out_dir.join("chain.json"), ledger.blocks())?;
    write_json(&out_dir.join("alerts.json"), ledger.alerts())?;

    let tex = render_latex_report(&manifest, ledger.alerts(), ledger.scan_history());
    let tex_path = out_dir.join("audit_report.tex");
    std::fs::write(&tex_path, &tex).ctx_report(&format!("write {}", tex_path.display()))?;

    let pdf_path = out_dir.join("audit_report.pdf");
    let pdf_bytes = build_audit_pdf(&manifest, ledger.alerts(), ledger.scan_history())?;
    std::fs::write(&pdf_path, pdf_bytes).ctx_report(&format!("write {}", pdf_path.display()))?;

    info!(
        out_dir = %out_dir.display(),
        blocks = manifest.chain_length,
        integrity_ok,
        "audit pack written"
    );
    Ok(manifest)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .ctx_report(&format!("serialize {}", path.display()))?;
    std::fs::write(path, json).ctx_report(&format!("write {}", path.display()))
}

// ---------------------------------------------------------------------------
// LaTeX report
// ---------------------------------------------------------------------------

fn escape_tex(s: &str) -> String {
    s.replace('\\', "\\textbackslash{}")
        .replace('&', "\\&")
        .replace('%', "\\%")
        .replace('$', "\\$")
        .replace('#', "\\#")
        .replace('_', "\\_")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('~', "\\textasciitilde{}")
        .replace('^', "\\textasciicircum{}")
}

pub fn render_latex_report(
    manifest: &AuditManifest,
    alerts: &[Alert],
    scans: &[ScanEntry],
) -> String {
    let s = &manifest.stats;
    let mut out = String::new();
    out.push_str(
        r#"\documentclass[11pt]{article}
\usepackage[a4paper,margin=1in]{geometry}
\usepackage{longtable}
\usepackage{hyperref}
\begin{document}
"#,
    );
    out.push_str(&format!(
        "\\section*{{MedLedger Audit Report}}\\noindent Generated at (UTC): {}\\\\\n",
        escape_tex(&manifest.generated_at_utc)
    ));
    out.push_str(&format!("Software: {}\\\\\n", escape_tex(&manifest.software)));
    out.push_str(&format!("Blocks: {}\\\\\n", manifest.chain_length));
    out.push_str(&format!(
        "Head hash: \\texttt{{{}}}\\\\\n",
        escape_tex(&manifest.head_hash)
    ));
    out.push_str(&format!(
        "Chain integrity: {}\\\\\n",
        if manifest.integrity_ok { "VERIFIED" } else { "FAILED" }
    ));

    out.push_str("\\subsection*{Summary}\n");
    out.push_str(&format!(
        "Medicines: {} (active {}, sold {}, flagged {}, expired {})\\\\\n",
        s.medicines, s.active, s.sold, s.flagged, s.expired
    ));
    out.push_str(&format!(
        "Scans: {} (authentic {}, suspicious {}, counterfeit {})\\\\\n",
        s.scans, s.authentic_scans, s.suspicious_scans, s.counterfeit_scans
    ));
    out.push_str(&format!("Alerts: {} ({} open)\\\\\n", s.alerts, s.open_alerts));

    out.push_str("\\subsection*{Alerts}\n");
    out.push_str(
        r#"\begin{longtable}{r l l l}
\textbf{Block} & \textbf{Batch} & \textbf{Severity} & \textbf{Reason}\\ \hline
"#,
    );
    for a in alerts {
        out.push_str(&format!(
            "{} & {} & {} & {}\\\\\n",
            a.block_index,
            escape_tex(&a.batch_id),
            a.severity,
            escape_tex(&a.reason)
        ));
    }
    out.push_str("\\end{longtable}\n");

    out.push_str("\\subsection*{Scan history}\n");
    out.push_str(
        r#"\begin{longtable}{r l l l}
\textbf{Block} & \textbf{Batch} & \textbf{Verdict} & \textbf{Scanned by}\\ \hline
"#,
    );
    for e in scans {
        out.push_str(&format!(
            "{} & {} & {} & {}\\\\\n",
            e.block_index,
            escape_tex(&e.batch_id),
            e.verdict,
            escape_tex(&e.scanned_by)
        ));
    }
    out.push_str("\\end{longtable}\n");
    out.push_str("\\end{document}\n");
    out
}

// ---------------------------------------------------------------------------
// PrintPDF-based PDF generation
// ---------------------------------------------------------------------------

fn build_audit_pdf(
    manifest: &AuditManifest,
    alerts: &[Alert],
    scans: &[ScanEntry],
) -> Result<Vec<u8>> {
    let lines = build_pdf_lines(manifest, alerts, scans);
    let (doc, page1, layer1) =
        PdfDocument::new("MedLedger Audit Report", Mm(210.0), Mm(297.0), "Layer 1");
    let font_regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .ctx_report("load Helvetica")?;
    let font_bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .ctx_report("load Helvetica-Bold")?;

    let mut layer = doc.get_page(page1).get_layer(layer1);
    let mut y = 280.0;
    let line_height = 6.0;

    for (bold, size, text) in lines {
        if y < 20.0 {
            let (new_page, new_layer) = doc.add_page(Mm(210.0), Mm(297.0), "Layer");
            layer = doc.get_page(new_page).get_layer(new_layer);
            y = 280.0;
        }
        let font = if bold { &font_bold } else { &font_regular };
        layer.use_text(text, size, Mm(15.0), Mm(y), font);
        y -= line_height;
    }

    let mut buffer = Vec::new();
    {
        let mut writer = std::io::BufWriter::new(&mut buffer);
        doc.save(&mut writer).ctx_report("render PDF")?;
    }
    Ok(buffer)
}

fn build_pdf_lines(
    manifest: &AuditManifest,
    alerts: &[Alert],
    scans: &[ScanEntry],
) -> Vec<(bool, f32, String)> {
    let s = &manifest.stats;
    let mut lines: Vec<(bool, f32, String)> = Vec::new();
    lines.push((true, 16.0, "MedLedger Audit Report".to_string()));
    lines.push((false, 10.0, String::new()));
    lines.push((false, 10.0, format!("Generated: {}", manifest.generated_at_utc)));
    lines.push((false, 10.0, format!("Software: {}", manifest.software)));
    lines.push((false, 10.0, format!("Blocks: {}", manifest.chain_length)));
    lines.push((false, 10.0, format!("Head hash: {}", truncate_str(&manifest.head_hash, 48))));
    lines.push((
        false,
        10.0,
        format!(
            "Chain integrity: {}",
            if manifest.integrity_ok { "VERIFIED" } else { "FAILED" }
        ),
    ));
    lines.push((
        false,
        10.0,
        format!(
            "Medicines: {} (active {}, sold {}, flagged {})",
            s.medicines, s.active, s.sold, s.flagged
        ),
    ));
    lines.push((
        false,
        10.0,
        format!(
            "Scans: {} (authentic {}, suspicious {}, counterfeit {})",
            s.scans, s.authentic_scans, s.suspicious_scans, s.counterfeit_scans
        ),
    ));
    lines.push((false, 10.0, String::new()));

    lines.push((true, 12.0, "Alerts".to_string()));
    lines.push((
        true,
        9.0,
        format!("{:<7} {:<24} {:<9} {}", "Block", "Batch", "Severity", "Reason"),
    ));
    for a in alerts {
        lines.push((
            false,
            9.0,
            format!(
                "{:<7} {:<24} {:<9} {}",
                a.block_index,
                truncate_str(&a.batch_id, 22),
                a.severity.to_string(),
                truncate_str(&a.reason, 60)
            ),
        ));
    }
    lines.push((false, 10.0, String::new()));

    lines.push((true, 12.0, "Scan history".to_string()));
    lines.push((
        true,
        9.0,
        format!("{:<7} {:<24} {:<12} {}", "Block", "Batch", "Verdict", "Scanned by"),
    ));
    for e in scans {
        lines.push((
            false,
            9.0,
            format!(
                "{:<7} {:<24} {:<12} {}",
                e.block_index,
                truncate_str(&e.batch_id, 22),
                e.verdict.to_string(),
                truncate_str(&e.scanned_by, 30)
            ),
        ));
    }

    lines.push((false, 10.0, String::new()));
    lines.push((
        false,
        8.0,
        "Generated by MedLedger. Block hashes can be re-verified offline from chain.json."
            .to_string(),
    ));
    lines
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
