//! Prompts and fixed texts for batch generation.
//!
//! Every string the pipeline sends to the VLM or writes in place of VLM
//! output lives here, so changing wording never touches retry or assembly
//! logic.
//!
//! Callers can override the system prompt via
//! [`crate::config::ServiceConfig::system_prompt`]; the per-batch request text
//! built by [`batch_request`] is always generated here.

/// Section text used when a batch produced no usable output after every
/// attempt. The job still completes; readers see this marker instead.
pub const BATCH_PLACEHOLDER: &str = "(No output could be generated for this batch.)";

/// Separator between batch sections in the assembled document.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Default system prompt for converting a batch of page images to Markdown.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert document converter. You receive several consecutive pages of one document as images, in page order. Convert all of them to clean, well-structured Markdown.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Transcribe ALL text on every page completely and verbatim
   - Do not summarise, shorten or reorder content
   - Maintain the reading order as a human would read each page

2. STRUCTURE
   - Start headings at ### and go deeper (####, #####) for sub-headings
   - Use - for unordered lists and 1. 2. 3. for ordered lists
   - Use **bold** and *italic* to match the visual emphasis

3. TABLES
   - Convert tables to GFM pipe format

4. FIGURES
   - Describe meaningful figures, diagrams and charts in detail as
     [Figure: description]
   - Put a figure's caption or label right after its description
   - Skip purely decorative images

5. PAGES
   - Process the pages in the order given
   - Continue from one page to the next without any separator line
   - Never output a line made only of dashes; use * * * for a visible rule

6. OUTPUT FORMAT
   - Output ONLY the Markdown content
   - Do NOT wrap the output in ``` fences
   - Do NOT add commentary, file names or "Page X of Y" markers"#;

/// Build the user-message text for one batch.
///
/// `pages` holds `(1-based page number, extracted text)` for every page in
/// the batch; pages whose extracted text is blank are omitted from the
/// context block. The extracted text is auxiliary: the images remain the
/// source of truth, but the text layer helps with exact spelling and numbers.
pub fn batch_request(first_page: usize, last_page: usize, pages: &[(usize, &str)]) -> String {
    let mut out = if first_page == last_page {
        format!("The attached image is page {first_page} of the document.\n")
    } else {
        format!("The attached images are pages {first_page}-{last_page} of the document, in order.\n")
    };

    let context: Vec<&(usize, &str)> = pages.iter().filter(|(_, t)| !t.trim().is_empty()).collect();
    if !context.is_empty() {
        out.push_str("\nText extracted from the PDF for these pages, for reference:\n\n");
        for (page, text) in context {
            out.push_str(&format!("--- page {page} ---\n{}\n\n", text.trim()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_names_page_range() {
        let req = batch_request(11, 20, &[]);
        assert!(req.contains("pages 11-20"), "got: {req}");
        assert!(!req.contains("extracted"));
    }

    #[test]
    fn single_page_request() {
        let req = batch_request(7, 7, &[(7, "")]);
        assert!(req.contains("page 7 of the document"));
    }

    #[test]
    fn blank_text_is_skipped() {
        let req = batch_request(1, 3, &[(1, "Intro"), (2, "   \n"), (3, "Summary")]);
        assert!(req.contains("--- page 1 ---\nIntro"));
        assert!(!req.contains("--- page 2 ---"));
        assert!(req.contains("--- page 3 ---\nSummary"));
    }

    #[test]
    fn default_prompt_never_asks_for_dash_rules() {
        assert!(!DEFAULT_SYSTEM_PROMPT.lines().any(|l| l.trim() == "---"));
        assert!(!DEFAULT_SYSTEM_PROMPT.contains("then ---"));
    }

    #[test]
    fn placeholder_survives_normalisation() {
        assert_eq!(
            crate::pipeline::postprocess::normalize_batch_output(BATCH_PLACEHOLDER),
            BATCH_PLACEHOLDER
        );
    }
}
