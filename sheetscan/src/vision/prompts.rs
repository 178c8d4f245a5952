//! Instruction sent with every extraction batch.

/// Build the fixed extraction instruction for a batch.
///
/// Labels are listed in the same order the images are attached so the
/// service can echo them back; the reply is matched on `image_id`.
pub fn batch_extraction_prompt(labels: &[&str]) -> String {
    let listing = labels
        .iter()
        .enumerate()
        .map(|(i, id)| format!("{}. {id}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are reviewing {count} cropped regions of architectural and engineering drawings.
For EACH image, extract the following fields:

- classification: exactly one of "Plan", "Elevation", "Section", "Detail", "Notes", "Schedule". Use "Unknown" if none applies.
- location: short label for where in the building or site the drawing applies (e.g. "Level 2", "Grid C-D / 4-6"). Empty string if not shown.
- section_callouts: array of every section, detail or elevation callout visible (e.g. "A/S01", "Section A-A"), in reading order. Empty array if none.
- element_type: the main building element or system shown (e.g. "Stair", "Curtain wall", "Footing").
- text_verbatim: all legible text exactly as written, preserving line breaks.
- summary: two or three sentences describing the drawing; quote key text from text_verbatim where useful.

Images, in the order attached:
{listing}

Respond with valid JSON only, no commentary, in this format:
{{"images": [
  {{"image_id": "<label from the list>", "classification": "Section", "location": "", "section_callouts": [], "element_type": "", "text_verbatim": "", "summary": ""}}
]}}
Return exactly one entry per image and copy each image_id exactly as listed."#,
        count = labels.len()
    )
}
