// Prompts for cooperative ledger and audit assessment generation

use serde::Serialize;
use std::collections::BTreeMap;

use crate::llm::types::ChatMessage;
use crate::schema::{LedgerEntry, StatementType};
use crate::store::{GroupContext, StoredLedgerEntry};

pub const LEDGER_SCHEMA_NAME: &str = "ledger_structure";

pub const LEDGER_SCHEMA_DESCRIPTION: &str =
    "Struktur lengkap lejar koperasi dengan penilaian risiko, materialiti, dan persampelan audit";

pub const LEDGER_SYSTEM_PROMPT: &str = r#"Anda adalah pakar akaun koperasi. Sila jana struktur lejar dan penilaian berdasarkan data kewangan yang diberikan.

PENTING: Anda mesti mengikut format JSON yang tepat untuk semua bahagian.

BAHAGIAN LEJAR:
{
  "ledger": {
    "title": "[NAMA ORGANISASI]",
    "subtitle": "PENYATA KEWANGAN : 31 DISEMBER [TAHUN SEMASA]",
    "columns": [
      { "name": "AKAUN [TAHUN SEMASA + 1]", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "DRAF [TAHUN SEMASA]", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "PELARASAN", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "IMBANGAN DUGA", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "AKAUN PERNIAGAAN", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "AK UI BUDI", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "AK PEMBAHAGIAN", "subColumns": ["DEBIT RM", "KREDIT RM"] },
      { "name": "KUNCI KIRA-KIRA", "subColumns": ["DEBIT RM", "KREDIT RM"] }
    ],
    "rows": [...]
  },
  "riskAssessment": {
    "overallRisk": "[MESTI salah satu: HIGH, MEDIUM, LOW]",
    "categories": [
      {
        "name": "Risiko Kewangan",
        "level": "[MESTI salah satu: HIGH, MEDIUM, LOW]",
        "status": "[MESTI salah satu: NEED ATTENTION, MONITORING, ACCEPTABLE]",
        "description": "Penerangan risiko",
        "recommendations": ["Cadangan 1", "Cadangan 2"],
        "isOpen": false
      }
    ]
  },
  "materiality": {
    "overallLevel": "[MESTI salah satu: HIGH, MEDIUM, LOW]",
    "categories": [
      {
        "name": "Materialiti Kewangan",
        "level": "[MESTI salah satu: HIGH, MEDIUM, LOW]",
        "description": "Penerangan materialiti",
        "recommendations": ["Cadangan 1", "Cadangan 2"],
        "isOpen": false
      }
    ]
  },
  "auditSampling": {
    "overallLevel": "[MESTI salah satu: HIGH, MEDIUM, LOW]",
    "categories": [
      {
        "name": "Persampelan Rawak",
        "level": "[MESTI salah satu: HIGH, MEDIUM, LOW]",
        "description": "Penerangan kaedah persampelan",
        "recommendations": ["Cadangan 1", "Cadangan 2"],
        "isOpen": false
      }
    ]
  }
}

ARAHAN PENTING UNTUK LEJAR:
1. Gunakan data amount_current untuk DRAF [TAHUN SEMASA]
2. Gunakan data amount_previous untuk AKAUN [TAHUN SEMASA + 1]
3. Untuk lajur lain, gunakan nilai kosong ("")
4. Kod mesti bermula dengan 10000 untuk seksyen utama
5. Tambah 10 untuk setiap item dalam seksyen
6. Type mesti "header" untuk seksyen utama dan "item" untuk butiran
7. Setiap nilai lajur MESTI ada debitBg dan kreditBg (boolean)
8. Pastikan semua nama lajur dalam values tepat sama dengan nama dalam columns
9. Pastikan semua nilai debit/kredit adalah string kosong ("") jika tiada nilai
10. PENTING: Gunakan "kredit" dan "kreditBg" (bukan "credit" atau "creditBg")
11. PENTING: Semua nilai numeric mesti dalam format string
12. PENTING: Setiap row MESTI ada values untuk SEMUA columns yang didefinisikan

ARAHAN UNTUK PENILAIAN RISIKO:
1. Nilai tahap risiko keseluruhan MESTI salah satu dari: HIGH, MEDIUM, LOW
2. Kenal pasti sekurang-kurangnya 3 kategori risiko utama
3. Berikan cadangan yang spesifik untuk setiap kategori
4. Status MESTI salah satu dari: NEED ATTENTION, MONITORING, ACCEPTABLE
5. Level MESTI salah satu dari: HIGH, MEDIUM, LOW

ARAHAN UNTUK MATERIALITI:
1. Nilai tahap materialiti keseluruhan MESTI salah satu dari: HIGH, MEDIUM, LOW
2. Kenal pasti sekurang-kurangnya 2 kategori materialiti
3. Berikan cadangan yang spesifik untuk setiap kategori
4. Level MESTI salah satu dari: HIGH, MEDIUM, LOW

ARAHAN UNTUK PERSAMPELAN AUDIT:
1. Tahap persampelan audit keseluruhan MESTI salah satu dari: HIGH, MEDIUM, LOW
2. Kenal pasti sekurang-kurangnya 2 kategori persampelan
3. Berikan cadangan yang spesifik untuk setiap kategori
4. Level MESTI salah satu dari: HIGH, MEDIUM, LOW"#;

pub const ANALYSIS_SCHEMA_NAME: &str = "statement_analysis";

pub const ANALYSIS_SCHEMA_DESCRIPTION: &str =
    "Analisis penyata kewangan yang mengandungi jumlah isu, senarai isu terperinci, dan keperluan semakan";

pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"Anda adalah pakar audit kewangan. Analisis penyata kewangan yang diberikan dalam dua bahagian.

BAHAGIAN 1: GAMBARAN KESELURUHAN DOKUMEN
Senaraikan setiap isu dalam "document_overview" dengan issue_type, issue_category, issue_description, expected_result dan correction_suggestion.

BAHAGIAN 2: RINGKASAN
Isikan "summary" dengan bilangan isu utama, isu kecil, pembetulan dokumen, bahagian yang perlu disemak, dan senarai nama bahagian tersebut.

Pastikan:
1. Semua nombor dalam format angka, bukan string
2. Semua teks dalam Bahasa Melayu yang formal dan profesional
3. issue_type mesti "Kecil Isu" atau "Isu Utama"
4. issue_category deskriptif dan spesifik
5. Setiap isu mempunyai penerangan yang jelas dan cadangan pembetulan yang praktikal"#;

#[derive(Debug, Serialize)]
struct PromptEntry<'a> {
    section: &'a str,
    label: &'a str,
    amount_current: Option<f64>,
    amount_previous: Option<f64>,
    is_total: bool,
}

#[derive(Debug, Serialize)]
struct StatementPayload<'a> {
    #[serde(rename = "type")]
    statement_type: StatementType,
    organization: &'a str,
    year_current: Option<i32>,
    year_previous: Option<i32>,
    entries: Vec<PromptEntry<'a>>,
}

fn prompt_entries(entries: &[StoredLedgerEntry]) -> Vec<PromptEntry<'_>> {
    entries
        .iter()
        .map(|e| PromptEntry {
            section: &e.section,
            label: &e.label,
            amount_current: e.amount_current,
            amount_previous: e.amount_previous,
            is_total: e.is_total,
        })
        .collect()
}

/// System prompt followed by one user message per statement type.
///
/// Statements are keyed by type; when a group holds two statements of the same
/// type the later one wins.
pub fn build_generation_messages(
    context: &GroupContext,
) -> Result<Vec<ChatMessage>, serde_json::Error> {
    let by_type: BTreeMap<StatementType, _> = context
        .statements
        .iter()
        .map(|s| (s.statement_type, s))
        .collect();

    let mut messages = vec![ChatMessage::system(LEDGER_SYSTEM_PROMPT)];

    for (statement_type, statement) in by_type {
        let payload = StatementPayload {
            statement_type,
            organization: &context.organization_name,
            year_current: statement.year_current,
            year_previous: statement.year_previous,
            entries: prompt_entries(&statement.entries),
        };
        messages.push(ChatMessage::user(format!(
            "Sila jana struktur {}: {}",
            statement_type,
            serde_json::to_string(&payload)?
        )));
    }

    Ok(messages)
}

#[derive(Debug, Serialize)]
struct AnalysisEntry<'a> {
    label: &'a str,
    amount_current: Option<f64>,
    amount_previous: Option<f64>,
    is_total: bool,
}

#[derive(Debug, Serialize)]
struct AnalysisPayload<'a> {
    statement_type: StatementType,
    entries: BTreeMap<&'a str, Vec<AnalysisEntry<'a>>>,
}

/// System prompt, with the user's reference notes appended when present, and one
/// user message carrying the statement's entries grouped by section.
pub fn build_analysis_messages(
    statement_type: StatementType,
    entries: &[LedgerEntry],
    guidance: Option<&str>,
) -> Result<Vec<ChatMessage>, serde_json::Error> {
    let mut sections: BTreeMap<&str, Vec<AnalysisEntry<'_>>> = BTreeMap::new();
    for entry in entries {
        sections
            .entry(entry.section.as_str())
            .or_default()
            .push(AnalysisEntry {
                label: &entry.label,
                amount_current: entry.amount_current,
                amount_previous: entry.amount_previous,
                is_total: entry.is_total,
            });
    }

    let system = match guidance.map(str::trim).filter(|g| !g.is_empty()) {
        Some(notes) => format!(
            "{}\n\nPanduan tambahan dari pengguna:\n{}",
            ANALYSIS_SYSTEM_PROMPT, notes
        ),
        None => ANALYSIS_SYSTEM_PROMPT.to_string(),
    };
    let payload = AnalysisPayload {
        statement_type,
        entries: sections,
    };

    Ok(vec![
        ChatMessage::system(system),
        ChatMessage::user(format!(
            "Sila analisis penyata kewangan ini: {}",
            serde_json::to_string_pretty(&payload)?
        )),
    ])
}
