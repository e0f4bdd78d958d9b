//! Prompt construction for the extraction and review tiers.
//!
//! Every prompt demands strict JSON, ISO dates, and an explicit confidence
//! per field. Models are told to return null rather than guess; the parser
//! tolerates markdown fences but nothing else.

pub const CONTRACT_SYSTEM_PROMPT: &str = "\
You are an extraction engine for service contracts. Think step by step \
privately. Return only JSON that matches the schema. If a field is not \
explicitly present in the text, return null for its value. Include a \
confidence from 0 to 1 for every field. Never invent values.";

pub const INVOICE_SYSTEM_PROMPT: &str = "\
You are an extraction engine for invoices. Think step by step privately. \
Return only JSON that matches the schema. If a field is not explicitly \
present in the text, return null for its value. Include a confidence from \
0 to 1 for every field. Never invent values.";

pub const REVIEW_SYSTEM_PROMPT: &str = "\
You are a reconciliation reviewer. You receive a contract summary, an \
invoice summary, the computed matches, and the computed flags. You may ONLY \
add: short rationale notes for existing flags (cite the exact numbers and \
clause text provided) and additional advisory findings the rules cannot \
see. You may not remove, reword, or re-grade any existing flag. Return \
only JSON matching the schema.";

const CONTRACT_SCHEMA: &str = r#"{
  "vendor": {"value": "string or null", "confidence": 0.0},
  "service_category": {"value": "string or null", "confidence": 0.0},
  "start_date": {"value": "YYYY-MM-DD or null", "confidence": 0.0},
  "end_date": {"value": "YYYY-MM-DD or null", "confidence": 0.0},
  "auto_renew": {"value": true, "confidence": 0.0},
  "renewal_notice_days": {"value": 0, "confidence": 0.0},
  "price_escalation": {
    "value": {"kind": "fixed_pct | cpi | none", "amount_pct": 0.0},
    "confidence": 0.0
  },
  "cap_total": {"value": 0.0, "confidence": 0.0},
  "allowed_fees": {"value": ["string"], "confidence": 0.0},
  "terms": [
    {
      "item_code": {"value": "string or null", "confidence": 0.0},
      "item_desc": {"value": "string or null", "confidence": 0.0},
      "unit": {"value": "string or null", "confidence": 0.0},
      "unit_price": {"value": 0.0, "confidence": 0.0},
      "min_qty": {"value": 0.0, "confidence": 0.0},
      "max_qty": {"value": 0.0, "confidence": 0.0},
      "effective_start": {"value": "YYYY-MM-DD or null", "confidence": 0.0},
      "effective_end": {"value": "YYYY-MM-DD or null", "confidence": 0.0}
    }
  ]
}"#;

const INVOICE_SCHEMA: &str = r#"{
  "vendor": {"value": "string or null", "confidence": 0.0},
  "invoice_no": {"value": "string or null", "confidence": 0.0},
  "invoice_date": {"value": "YYYY-MM-DD or null", "confidence": 0.0},
  "due_date": {"value": "YYYY-MM-DD or null", "confidence": 0.0},
  "lines": [
    {
      "item_code": {"value": "string or null", "confidence": 0.0},
      "item_desc": {"value": "string or null", "confidence": 0.0},
      "unit": {"value": "string or null", "confidence": 0.0},
      "qty": {"value": 0.0, "confidence": 0.0},
      "unit_price": {"value": 0.0, "confidence": 0.0},
      "line_total": {"value": 0.0, "confidence": 0.0},
      "service_period_start": {"value": "YYYY-MM-DD or null", "confidence": 0.0},
      "service_period_end": {"value": "YYYY-MM-DD or null", "confidence": 0.0}
    }
  ]
}"#;

const REVIEW_SCHEMA: &str = r#"{
  "flag_notes": [
    {"flag_index": 0, "note": "short rationale citing the numbers"}
  ],
  "advisory_flags": [
    {"summary": "finding the rules cannot compute", "severity": "info | warning"}
  ]
}"#;

pub fn build_contract_prompt(text: &str) -> String {
    format!(
        "Return strict JSON matching this exact schema. Do not invent values. \
Dates must be ISO format (YYYY-MM-DD). Money must be numbers, not strings. \
Units must be normalized (e.g. 'month', 'hour', 'user'). Prefer clearly \
stated tables or schedules over prose.\n\nSchema:\n{CONTRACT_SCHEMA}\n\n\
<document>\n{text}\n</document>"
    )
}

pub fn build_invoice_prompt(text: &str) -> String {
    format!(
        "Return strict JSON matching this exact schema. Do not invent values. \
Dates must be ISO format (YYYY-MM-DD). Money must be numbers, not strings. \
If line_total is missing but qty and unit_price are stated, compute it as \
qty times unit_price.\n\nSchema:\n{INVOICE_SCHEMA}\n\n\
<document>\n{text}\n</document>"
    )
}

pub fn build_review_prompt(payload_json: &str) -> String {
    format!(
        "Given the reconciliation draft below, return strict JSON matching \
this exact schema. flag_index refers to the position in the flags array. \
Only include notes you can justify from the numbers given.\n\n\
Schema:\n{REVIEW_SCHEMA}\n\nDraft:\n{payload_json}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_prompt_embeds_document_and_schema() {
        let prompt = build_contract_prompt("MSA between Acme and client");
        assert!(prompt.contains("<document>\nMSA between Acme and client\n</document>"));
        assert!(prompt.contains("\"price_escalation\""));
    }

    #[test]
    fn invoice_prompt_mentions_line_total_derivation() {
        let prompt = build_invoice_prompt("Invoice INV-1");
        assert!(prompt.contains("qty times unit_price"));
        assert!(prompt.contains("\"invoice_no\""));
    }

    #[test]
    fn review_prompt_embeds_payload() {
        let prompt = build_review_prompt("{\"flags\":[]}");
        assert!(prompt.contains("{\"flags\":[]}"));
        assert!(prompt.contains("flag_index"));
    }
}
