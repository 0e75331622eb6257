//! Prompts for the correction tasks.
//!
//! Every prompt asks for a single JSON object. The response schema itself is
//! appended by the generator, so these templates only describe the job.
//! Placeholders in braces are replaced with [`fill`].

/// System prompt for every structured-generation call.
pub const STRUCTURED_SYSTEM_PROMPT: &str = r#"You are a meticulous document correction assistant. You compare recognized document content against an image of the original and return corrections.

Follow these rules precisely:
1. Respond with a single JSON object and nothing else.
2. Do NOT wrap the JSON in markdown fences.
3. Do NOT add commentary outside the JSON object.
4. Preserve every piece of text that is visible in the image."#;

/// Table correction. Placeholder: `{block_html}`.
pub const TABLE_CORRECTION_PROMPT: &str = r#"You are given an image of a table and an HTML representation of it produced by a recognition system. The HTML may contain errors: missing or extra rows and columns, text in the wrong cell, or merged cells that should be split.

Compare the HTML with the image carefully.

First, in "comparison", describe the differences you find between the image and the HTML.
Then, in "corrected_html", write the corrected HTML table.
- Use only <table>, <thead>, <tbody>, <tr>, <th> and <td>.
- Use rowspan and colspan where cells are merged in the image.
- Write inline math inside <math> tags.
If the HTML already matches the image, write "No corrections needed." as corrected_html.

HTML representation:
```html
{block_html}
```"#;

/// Inline-math line correction. Placeholder: `{lines}`.
pub const INLINE_MATH_PROMPT: &str = r#"You are given an image of a block of text and the text recognized from it, one line per entry. The text may contain OCR errors, and inline math may be missing or malformed.

Correct each line so it matches the image exactly:
- Keep exactly the same number of lines, in the same order.
- Write inline math as LaTeX inside <math> tags, e.g. <math>x^2</math>.
- Use <b> and <i> for bold and italic text.
- Do not merge or split lines.

Return the corrected lines in "corrected_lines".

Recognized lines:
{lines}"#;

/// Display-equation correction. Placeholder: `{equation}`.
pub const EQUATION_PROMPT: &str = r#"You are given an image of a mathematical equation and the LaTeX recognized from it.

Write the equation in "corrected_equation" as HTML: place the LaTeX inside a <math display="block"> tag. Fix any recognition errors so that it matches the image. Keep any text outside the math as plain text.

Recognized equation:
{equation}"#;

/// Picture and figure description. No placeholders.
pub const IMAGE_DESCRIPTION_PROMPT: &str = r#"You are given an image taken from a document. Describe it so a reader who cannot see it understands its content.

- Start with the kind of image (chart, diagram, photograph, ...).
- Mention any visible labels, axes, legends and the key values or trends.
- Keep it to 3 to 6 sentences.

Return the description in "image_description"."#;

/// Replace `{key}` placeholders in `template`.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_replaces_placeholders() {
        let p = fill(TABLE_CORRECTION_PROMPT, &[("block_html", "<table></table>")]);
        assert!(p.contains("<table></table>"));
        assert!(!p.contains("{block_html}"));
    }

    #[test]
    fn prompts_name_their_keys() {
        assert!(TABLE_CORRECTION_PROMPT.contains("corrected_html"));
        assert!(INLINE_MATH_PROMPT.contains("corrected_lines"));
        assert!(EQUATION_PROMPT.contains("corrected_equation"));
        assert!(IMAGE_DESCRIPTION_PROMPT.contains("image_description"));
    }
}
