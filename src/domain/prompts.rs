//! Prompt templates for summarisation and speaker chat
//!
//! Placeholders in `{braces}` are substituted by the inference adapter.

/// Default prompt templates for the inference endpoints
pub struct PromptTemplates;

impl PromptTemplates {
    /// Merge a speaker's prior summary with newly transcribed speech.
    ///
    /// The model must answer with a JSON object so the adapter can update
    /// the speaker context document without further parsing heuristics.
    pub fn speaker_summary() -> &'static str {
        r#"You maintain a running summary of what one meeting participant has said.

Speaker: {speaker_name}

Existing summary (may be empty):
{prior_summary}

New speech since the last update:
{recent_text}

Merge the new speech into the summary. Keep it under 120 words, written in
third person, and preserve concrete facts (names, numbers, decisions).

Respond with ONLY a JSON object in this exact shape:
{"summary": "<merged summary>", "topics": ["<topic>", "..."]}

List at most 5 short topics the speaker has touched on so far."#
    }

    /// Answer a question about one speaker using their summary and
    /// retrieved transcript excerpts.
    pub fn speaker_chat() -> &'static str {
        r#"You answer questions about what a specific participant said in a meeting.

Speaker: {speaker_name}

What we know about this speaker so far:
{summary}

Relevant transcript excerpts:
{excerpts}

Question: {question}

Answer concisely using only the material above. If the material does not
contain the answer, say so plainly instead of guessing."#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_carry_placeholders() {
        let summary = PromptTemplates::speaker_summary();
        assert!(summary.contains("{prior_summary}"));
        assert!(summary.contains("{recent_text}"));
        assert!(summary.contains("{speaker_name}"));

        let chat = PromptTemplates::speaker_chat();
        assert!(chat.contains("{question}"));
        assert!(chat.contains("{excerpts}"));
    }
}
