use crate::models::GenerationRequest;

/// Builds the instruction sent to every candidate for a request.
///
/// The output depends only on the request, so attempts against different
/// candidates (and across rounds) receive byte-identical prompts.
pub fn build_prompt(request: &GenerationRequest) -> String {
    let topic = request.topic.trim();
    let difficulty = request.difficulty.as_str();
    let count = request.question_count;

    format!(
        r#"You are a professional quiz generator. Create a high-quality {difficulty} quiz about "{topic}".

Strictly return ONLY a valid JSON object. Do not include markdown formatting or any commentary.

The JSON structure must match this schema exactly:
{{
  "quiz": {{
    "title": "A creative title for the {topic} quiz",
    "id": "generated-id"
  }},
  "questions": [
    {{
      "question": "A clear, challenging question text",
      "options": {{
        "A": "Option A",
        "B": "Option B",
        "C": "Option C",
        "D": "Option D"
      }},
      "correctAnswer": "A",
      "explanation": "A helpful explanation of why the answer is correct"
    }}
  ]
}}

Requirements:
1. Generate exactly {count} questions at {difficulty} difficulty.
2. Every question must provide all 4 options under the keys "A", "B", "C" and "D", and the options must be distinct.
3. "correctAnswer" must be exactly one of "A", "B", "C" or "D" and refer to the correct option.
4. Ensure only one correct answer per question and make distractors plausible.
5. The JSON must be valid and parseable."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;

    #[test]
    fn prompt_is_deterministic() {
        let req = GenerationRequest::new("Photosynthesis", Difficulty::Hard, 7);
        assert_eq!(build_prompt(&req), build_prompt(&req.clone()));
    }

    #[test]
    fn prompt_embeds_request_parameters_and_schema() {
        let req = GenerationRequest::new("Roman history", Difficulty::Expert, 12);
        let prompt = build_prompt(&req);

        assert!(prompt.contains("\"Roman history\""));
        assert!(prompt.contains("expert"));
        assert!(prompt.contains("exactly 12 questions"));
        assert!(prompt.contains("\"correctAnswer\""));
        for key in ["\"A\"", "\"B\"", "\"C\"", "\"D\""] {
            assert!(prompt.contains(key), "missing option key {key}");
        }
    }

    #[test]
    fn different_requests_produce_different_prompts() {
        let a = GenerationRequest::new("Rust", Difficulty::Easy, 3);
        let b = GenerationRequest::new("Rust", Difficulty::Easy, 4);
        assert_ne!(build_prompt(&a), build_prompt(&b));
    }
}
