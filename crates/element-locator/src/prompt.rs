//! Structured prompt construction for element detection

use visionflow_core_types::PageContext;

/// Build the detection prompt for one (instruction, context) pair
///
/// The prompt demands strict JSON so the response can be parsed without
/// scraping prose. Recent actions are included so the model can
/// disambiguate repeated elements (e.g. the second "Delete" button
/// after the first was already clicked).
pub fn detection_prompt(instruction: &str, context: &PageContext) -> String {
    let mut prompt = format!(
        "You are analyzing a screenshot of a web page to locate a UI element.\n\
         \n\
         Target description: {instruction}\n"
    );

    if !context.url.is_empty() {
        prompt.push_str(&format!("Current URL: {}\n", context.url));
    }
    if !context.title.is_empty() {
        prompt.push_str(&format!("Page title: {}\n", context.title));
    }
    if !context.recent_actions.is_empty() {
        prompt.push_str("Recent actions, oldest first:\n");
        for action in &context.recent_actions {
            prompt.push_str(&format!("  - {action}\n"));
        }
    }

    prompt.push_str(
        "\nFind the element that best matches the target description.\n\
         Respond with ONLY a JSON object, no prose, in this exact shape:\n\
         {\n\
           \"found\": true | false,\n\
           \"confidence\": 0.0-1.0,\n\
           \"bounding_box\": {\"x\": int, \"y\": int, \"width\": int, \"height\": int},\n\
           \"element_type\": \"button|link|input|checkbox|dropdown|icon|text\",\n\
           \"visible_text\": \"text on the element, if any\",\n\
           \"alternatives\": [\n\
             {\"confidence\": 0.0-1.0, \"bounding_box\": {...}, \"element_type\": \"...\", \"visible_text\": \"...\"}\n\
           ]\n\
         }\n\
         \n\
         Coordinates are pixels in the supplied image. If no matching\n\
         element is visible, respond with {\"found\": false, \"confidence\": 0.0}.\n\
         List up to 3 alternatives ordered by descending confidence.\n",
    );

    prompt
}
