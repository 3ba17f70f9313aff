//! Prompt templates.
//!
//! All templates are plain `{placeholder}` substitution. The persona name
//! and description come from configuration so the same service can play
//! any documented figure.

use crate::session::ChatTurn;

pub fn render_history(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|t| {
            let role = match t.role {
                crate::session::Role::System => "system",
                crate::session::Role::User => "user",
                crate::session::Role::Assistant => "assistant",
            };
            format!("{}: {}", role, t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn persona_answer(
    persona_name: &str,
    persona_description: &str,
    history: &str,
    user_msg: &str,
    keyword_fragment: &str,
    context: &str,
) -> String {
    format!(
        "You are playing the role of {persona_name}, {persona_description}. \
Stay in character and answer as {persona_name} would.\n\
The conversation so far:\n{history}\n\
The user's current message is:\n{user_msg}\n\
Keywords extracted from the user's message and passages related to them:\n{keyword_fragment}\n\
You may also draw on the following reference material:\n{context}\n\
Reply to the user in {persona_name}'s own voice. Do not describe actions or \
expressions; give only the spoken reply:"
    )
}

pub fn keyword_extraction(persona_name: &str, history: &str) -> String {
    format!(
        "Below is part of a conversation between a user and an AI assistant. \
The user may or may not be discussing {persona_name}.\n\
Decide whether the user's most recent message concerns {persona_name} and output a boolean field.\n\
If it does, also extract keywords from that message; they will be used to search a database of \
{persona_name}'s writings. Prefer distinctive nouns and verbs tied to {persona_name}; avoid \
generic words.\n\
Answer with a JSON object of the form: \
{{\"is_about_figure\": true, \"keywords\": [\"k1\", \"k2\", \"k3\"]}}\n\
The conversation is:\n\n{history}"
    )
}

pub fn keyword_fragment(pairs: &[(String, Vec<String>)]) -> String {
    let mut fragment = String::new();
    for (keyword, paragraphs) in pairs {
        if paragraphs.is_empty() {
            continue;
        }
        fragment.push_str(&format!(
            "The user's keyword is '{}',\nrelated passages are:\n{}\n\n",
            keyword,
            paragraphs.join("\n")
        ));
    }
    fragment
}

pub fn session_abstract(history: &str) -> String {
    format!(
        "You are a historian skilled at summarizing the topic of a conversation \
with a historical figure.\n\
The conversation is:\n{history}\n\
Summarize the topic under discussion in no more than 20 words."
    )
}

pub fn topic_digest(topic: &str, raw_texts: &str) -> String {
    format!(
        "Below are news reports about \"{topic}\". Summarize their content in no more than \
50 words and extract 5 topic keywords.\n\
Return JSON. Example: {{\"abstract\": \"the ministry announced a pension tax adjustment\", \
\"keywords\": \"welfare, taxation, government, pensions, rate change\"}}\n\
The reports are:\n{raw_texts}\n\
Your answer:"
    )
}

pub fn news_commentary(persona_name: &str, context: &str, reference: &str) -> String {
    format!(
        "Task: write a commentary on current news in the voice of {persona_name}. \
Consult the related reports and imitate the target text when composing the commentary. \
Keep the commentary about as long as the target text.\n\
Note:\n\
1. Mirror the target text's narrative structure, rhetoric, language style, and attitude.\n\
2. Stay within the scope of the given news; do not invent events beyond it.\n\
3. Make the most of the information in the reports.\n\
4. Rephrase the target text's wording as needed to fit the news being commented on.\n\
==============================\n\
The news reports:\n{context}\n\
===============================\n\
The target text to imitate:\n{reference}\n\
===============================\n\
Your commentary:"
    )
}

pub fn one_line_take(persona_name: &str, commentary: &str) -> String {
    format!(
        "Condense the following commentary into a single punchy sentence, still in \
{persona_name}'s voice:\n{commentary}\n\
Your sentence:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatTurn;

    #[test]
    fn history_renders_roles_in_order() {
        let turns = vec![ChatTurn::user("hello"), ChatTurn::assistant("greetings")];
        let rendered = render_history(&turns);
        assert_eq!(rendered, "user: hello\nassistant: greetings");
    }

    #[test]
    fn persona_answer_embeds_all_parts() {
        let prompt = persona_answer(
            "Zou Taofen",
            "a publisher",
            "user: hi",
            "who are you?",
            "keyword stuff",
            "reference stuff",
        );
        assert!(prompt.contains("Zou Taofen"));
        assert!(prompt.contains("user: hi"));
        assert!(prompt.contains("who are you?"));
        assert!(prompt.contains("keyword stuff"));
        assert!(prompt.contains("reference stuff"));
    }

    #[test]
    fn keyword_fragment_skips_empty_matches() {
        let pairs = vec![
            ("press".to_string(), vec!["a passage".to_string()]),
            ("empty".to_string(), vec![]),
        ];
        let fragment = keyword_fragment(&pairs);
        assert!(fragment.contains("press"));
        assert!(fragment.contains("a passage"));
        assert!(!fragment.contains("empty"));
    }

    #[test]
    fn keyword_extraction_asks_for_json() {
        let prompt = keyword_extraction("Zou Taofen", "user: hi");
        assert!(prompt.contains("\"is_about_figure\""));
        assert!(prompt.contains("user: hi"));
    }
}
