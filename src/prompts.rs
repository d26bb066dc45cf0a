//! Prompt templates for the ingestion and mapping agents.
//!
//! Templates use `{{PLACEHOLDER}}` markers filled in by the render
//! functions below. Each prompt instructs the model to return either raw
//! Markdown or a single JSON object; the JSON ones are parsed by
//! [`crate::schema`].

/// Transcription: convert an uploaded document into clean Markdown.
pub const TRANSCRIPTION_PROMPT: &str = r#"
You are an expert "Librarian Agent" specializing in digitizing enterprise documents.
Your task is to convert the provided document into clean, well-structured Markdown format.

**Rules:**
1. **Preserve Structure**: Maintain the original headers, bullet points, and table structures.
2. **Remove Visual Noise**: Exclude headers, footers, page numbers, and decorative elements.
3. **Clean Text**: Fix any OCR errors or weird spacing issues.
4. **No summaries**: Do not summarize. Retrieve the full content.
5. **Images**: If there are diagrams, describe them briefly in italic text like *[Diagram: description]*.
6. **Output Format**: Return ONLY the Markdown content. Do not include any introductory text like "Here is the markdown...".
"#;

/// Metadata extraction: classification and governance fields as JSON.
pub const METADATA_PROMPT: &str = r#"
You are an expert "Knowledge Architect" specializing in enterprise data governance.
Analyze the provided document content and generate metadata for classification and governance.

**Known Categories:**
{{CATEGORY_LIST}}

**Output Requirement:**
Return a valid JSON object with the following fields:

1. `suggested_filename`: A standardized filename string.
   - Format: `[Dept]-[Type]-[Subject]-[Version]`
   - Example: `HR-Policy-RemoteWork-v2024.md`, `ENG-Spec-API_Migration-v1.md`
   - Use English letters, numbers, hyphens, and underscores only.

2. `title`: A clear, human-readable title.

3. `summary`: A concise 1-2 sentence summary of the document.

4. `tags`: An array of strings used for categorization (e.g., ["HR", "Remote Work", "Policy"]).

5. `topics`: An array of key topics or entities mentioned.

6. `document_type`: The type of document (e.g., "Policy", "Specification", "Meeting Minutes", "Report").

7. `department_suggestion`: Guess the most relevant department code (e.g., "HR", "ENG", "SALES", "FINANCE") based on content.

8. `category_suggestion`: Guess the most relevant document category name, preferring one of the known categories above.

**Example JSON:**
```json
{
  "suggested_filename": "HR-Policy-RemoteWork-v2024.md",
  "title": "Remote Work Policy 2024",
  "summary": "Defines eligibility, approval flow, and attendance standards for remote work.",
  "tags": ["HR", "Remote Work", "Policy"],
  "topics": ["attendance", "security", "Zoom"],
  "document_type": "Policy",
  "department_suggestion": "HR",
  "category_suggestion": "Policy"
}
```
"#;

/// Framework selection: pick the analytical frameworks that fit a document.
pub const SELECTION_PROMPT: &str = r#"
You are a "Strategic Analyst AI". Your goal is to determine which analytical frameworks fit the provided document content best.

**Available Frameworks:**
{{FRAMEWORK_LIST}}

**Task:**
1. Read the document content.
2. Select the **top 3-5 most relevant frameworks** that can structurize the key insights of this document.
3. If the document is very simple, you may select fewer (1-2).
4. If no framework fits well (e.g., just a meeting agenda or simple log), return an empty list.

**Output:**
Return a JSON object containing an array of selected frameworks.
The "code" MUST be exactly one of the codes provided above.

```json
{
  "selected_frameworks": [
    {
      "code": "exact_code_from_list",
      "confidence": 0.0 - 1.0,
      "reasoning": "Brief explanation why this fits."
    }
  ]
}
```
"#;

/// Structured extraction: fill one framework schema from document content.
pub const EXTRACTION_PROMPT: &str = r#"
You are a specialized Analyst AI. Your task is to extract structured insights from the document into the target framework schema.

**Target Framework:** {{FRAMEWORK_NAME}}
**Schema Definition:**
{{FRAMEWORK_SCHEMA}}

**Content:**
{{DOCUMENT_CONTENT}}

**Rules:**
1. Extract key points for each field in the schema.
2. If a field is a list, provide concise bullet points.
3. If information is missing for a field, leave it empty or null, do not hallucinate.
4. Calculate a 'completeness' score (0-1) based on how much of the schema you filled.
5. Calculate a 'confidence' score (0-1) based on how explicit the information was.

**Output:**
Return a JSON object matching this structure:
```json
{
  "title": "A concise title for this analysis (e.g., 'Q3 Marketing Strategy SWOT')",
  "summary": "A brief executive summary of findings",
  "data": { ... keys must match schema ... },
  "completeness": 0.8,
  "confidence": 0.9
}
```
"#;

/// Consolidation judge: merge into an existing instance or create a new one.
pub const CONSOLIDATION_PROMPT: &str = r#"
You are a "Knowledge Curator AI". A new analysis has been extracted and must be filed.
Decide whether it describes the SAME subject as one of the existing entries below
(and should be merged into it), or a DIFFERENT subject (and should become a new entry).

**Framework:** {{FRAMEWORK_NAME}}
**New Analysis Title:** {{NEW_TITLE}}
**Source Filename:** {{FILENAME}}

**Existing Entries:**
{{EXISTING_CANDIDATES}}

**Rules:**
1. Merge only when the new analysis clearly concerns the same subject (same product, team, initiative, or period).
2. Different versions or quarters of the same subject still count as the same subject.
3. When in doubt, create a new entry. A wrong merge loses information; a duplicate does not.

**Output:**
Return a JSON object:
```json
{
  "action": "MERGE" or "CREATE",
  "target_instance_id": "id of the entry to merge into (only when action is MERGE)",
  "reasoning": "One sentence explaining the decision."
}
```
"#;

/// Fill a single `{{PLACEHOLDER}}` marker.
pub fn fill(template: &str, placeholder: &str, value: &str) -> String {
    template.replace(&format!("{{{{{placeholder}}}}}"), value)
}

pub fn render_metadata(categories: &[String]) -> String {
    let list = if categories.is_empty() {
        "(none registered yet)".to_string()
    } else {
        categories
            .iter()
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    fill(METADATA_PROMPT, "CATEGORY_LIST", &list)
}

pub fn render_selection(framework_list: &str, content: &str) -> String {
    format!(
        "{}\nDocument Content:\n{}",
        fill(SELECTION_PROMPT, "FRAMEWORK_LIST", framework_list),
        content
    )
}

pub fn render_extraction(framework_name: &str, schema_json: &str, content: &str) -> String {
    let prompt = fill(EXTRACTION_PROMPT, "FRAMEWORK_NAME", framework_name);
    let prompt = fill(&prompt, "FRAMEWORK_SCHEMA", schema_json);
    fill(&prompt, "DOCUMENT_CONTENT", content)
}

pub fn render_consolidation(
    framework_name: &str,
    new_title: &str,
    filename: &str,
    candidate_list: &str,
) -> String {
    let prompt = fill(CONSOLIDATION_PROMPT, "FRAMEWORK_NAME", framework_name);
    let prompt = fill(&prompt, "NEW_TITLE", new_title);
    let prompt = fill(&prompt, "FILENAME", filename);
    fill(&prompt, "EXISTING_CANDIDATES", candidate_list)
}
