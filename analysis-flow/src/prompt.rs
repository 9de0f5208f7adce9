//! Instruction templates sent to the hosted model.

use crate::contract::UNPROCESSABLE_DOCUMENT_TYPE;

/// Instructions for analysing an attached vehicle purchase document.
pub const DOCUMENT_ANALYSIS_PROMPT: &str = r#"You are a document intelligence expert specializing in vehicle purchase agreements and legal documents. The document is attached to this message. Analyze it and perform these tasks:

1. **Detect Language**: Determine the language of the document. If it is not English, translate the key terms internally and write every field of your answer in English.
2. **Read Everything**: Interpret both machine-printed and handwritten text, including signatures, initials and margin notes.
3. **Identify Document Type**: Determine the type of document (e.g., 'Invoice', 'Sales Agreement', 'Loan Document').
4. **Summarize**: Provide a concise, easy-to-understand summary of the document's main purpose and content in plain English.
5. **Extract Key Facts**: Identify and list the most important facts. This includes vehicle details (make, model, year, VIN), pricing (total price, down payment, loan amount), dates (purchase date, delivery date), and involved parties.
6. **Identify Risks & Fees**: Scrutinize the document for any potential risks, hidden fees, penalties (e.g., late payment fees), or clauses that are unfavorable to the buyer.
7. **Create To-Do Items**: Extract any actionable items, deadlines, or required follow-ups for the user (e.g., 'Submit insurance proof by YYYY-MM-DD', 'Schedule vehicle registration').

For each extracted fact, risk, fee, and to-do item, provide a specific citation pointing to its location in the document (e.g., "Page 3, Section 4.2" or "Loan Terms, Paragraph 2"). Never leave a citation empty.

If the document is illegible, or its language cannot be translated, do NOT guess. Set "documentType" to "{unprocessable}", explain in "summary" why the document could not be processed, and return empty arrays for the other fields.

Respond with ONLY a JSON object of exactly this shape, with no commentary:
{
  "documentType": string,
  "summary": string,
  "keyFacts": [{ "fact": string, "citation": string }],
  "risksAndFees": [{ "description": string, "citation": string }],
  "toDoItems": [{ "item": string, "citation": string }]
}
Use an empty array when nothing was found for a field."#;

/// Instructions for distilling the legal text found at `{url}`.
pub const LEGAL_CLAUSES_PROMPT: &str = r#"You are an expert legal analyst. Your task is to extract and summarize the key legal clauses, obligations, and rights from the text found at the following URL: {url}. Focus on providing a clear and concise summary that highlights the most important aspects of the legal document for an average person to understand.

Respond with ONLY a JSON object of this shape, with no commentary:
{ "summary": string }"#;

/// Preamble for the legal distillation agent.
pub const LEGAL_ANALYST_PREAMBLE: &str =
    "You are an expert legal analyst who explains contracts and terms of service in plain language.";

pub fn document_analysis_prompt() -> String {
    DOCUMENT_ANALYSIS_PROMPT.replace("{unprocessable}", UNPROCESSABLE_DOCUMENT_TYPE)
}

pub fn legal_clauses_prompt(url: &str) -> String {
    LEGAL_CLAUSES_PROMPT.replace("{url}", url)
}
