use crate::model::{CreateFunction, EditFunction};

/// Builds the instruction sent to the synthesis model for a create function.
pub fn compose_create_prompt(text: &str, function: CreateFunction) -> String {
    match function {
        CreateFunction::Free => text.to_string(),
        CreateFunction::Sticker => format!(
            "A die-cut sticker of {}, vector art, vibrant colors, with a thin white border, on a neutral background.",
            text
        ),
        CreateFunction::Text => format!(
            r#"A modern, minimalist logo for "{}", vector design, clean lines, suitable for a tech company, on a white background."#,
            text
        ),
        CreateFunction::Comic => format!(
            "{}, in the style of a classic comic book panel, with bold outlines, halftone dots, and dramatic shading.",
            text
        ),
    }
}

/// Edit instructions pass through untouched, except when composing two images.
pub fn compose_edit_prompt(text: &str, function: EditFunction, has_second_image: bool) -> String {
    if function == EditFunction::Compose && has_second_image {
        format!("{}. Use the first provided image as the primary subject and structure.", text)
    } else {
        text.to_string()
    }
}
