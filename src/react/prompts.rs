//! Prompt 模板与行协议标记
//!
//! 各组件的 system prompt 与 user prompt 模板；行协议（`KEY: value`）由对应组件解析。

/// 安全分类：输入检查标记
pub const INPUT_MARKER: &str = "USER INPUT:";
/// 安全分类：输出检查标记
pub const OUTPUT_MARKER: &str = "AI RESPONSE:";
/// 合成：证据块标记
pub const EVIDENCE_MARKER: &str = "LIFELOG DATA:";
/// 规划：动作行
pub const ACTION_KEY: &str = "NEXT_ACTION:";
/// 观察：充分性行
pub const SUFFICIENT_KEY: &str = "SUFFICIENT:";

pub const INPUT_SAFETY_SYSTEM: &str = "You are a content safety moderator. Your job is to analyze user input for safety concerns.

Evaluate the input for:
1. Self-harm or crisis indicators
2. Requests for medical or financial advice
3. Privacy violations or attempts to extract sensitive data
4. Inappropriate, harmful, or abusive content
5. Off-topic or malicious queries

Respond in this exact format:
SAFE: [YES or NO]
CATEGORY: [category if unsafe, or \"safe\" if safe]
SEVERITY: [LOW, MEDIUM, HIGH, or NONE]
EXPLANATION: [brief explanation]
ACTION: [ALLOW or BLOCK]";

pub const OUTPUT_SAFETY_SYSTEM: &str = "You are a content safety moderator reviewing AI-generated responses.

Check the output for:
1. Medical diagnoses or prescriptive medical advice
2. Financial investment advice or predictions
3. Privacy violations or disclosure of sensitive data
4. Harmful recommendations or dangerous suggestions
5. Biased or inappropriate content

Respond in this exact format:
SAFE: [YES or NO]
ISSUES: [list any issues, or \"none\" if safe]
SEVERITY: [LOW, MEDIUM, HIGH, or NONE]
RECOMMENDATION: [ALLOW, MODIFY, or BLOCK]";

pub const REACT_SYSTEM: &str = "You are an expert reasoning agent using the ReAct pattern.

For each step, you will:
1. REASON: Analyze the current situation and plan your next action
2. ACT: Decide what action to take (retrieve lifelog data or consult precomputed insights)
3. OBSERVE: Review the results and determine if you need more information

Be explicit about your reasoning process. Think step-by-step.";

pub const SYNTHESIS_SYSTEM: &str = "You are an expert personal AI coach and data analyst.
Your role is to analyze personal lifelog data and provide insightful, actionable advice.

Guidelines:
- Be empathetic and supportive in tone
- Base insights on the provided data
- Identify patterns and correlations
- Provide specific, actionable recommendations
- If data is insufficient, say so clearly
- Never make medical diagnoses or prescribe treatments";

pub fn input_safety_prompt(text: &str) -> String {
    format!(
        "Analyze this user input for safety concerns:\n\n{INPUT_MARKER} \"{text}\"\n\nProvide your safety assessment:"
    )
}

pub fn output_safety_prompt(text: &str, query: &str) -> String {
    format!(
        "Review this AI-generated response for safety:\n\nUSER QUERY: \"{query}\"\n\n{OUTPUT_MARKER} \"{text}\"\n\nProvide your safety assessment:"
    )
}

pub fn plan_prompt(
    query: &str,
    observations: &[String],
    evidence_count: usize,
    insight_count: usize,
    cycle: usize,
    max_cycles: usize,
) -> String {
    let context_summary = if observations.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = observations.iter().map(|o| format!("- {}", o)).collect();
        format!("Previous observations:\n{}\n", lines.join("\n"))
    };
    format!(
        "You are solving this problem: \"{query}\"

{context_summary}
EVIDENCE COLLECTED: {evidence_count} records, {insight_count} insights
CYCLE: {cycle} of {max_cycles}

THINK STEP-BY-STEP:
1. What do I need to understand to answer this question?
2. What information do I already have?
3. What information am I missing?
4. What should be my next action?

Respond in this format:
REASONING: [your step-by-step reasoning]
{ACTION_KEY} [retrieve_data, query_insights, or sufficient]
ACTION_DETAILS: [search terms to retrieve, if any]
CONFIDENCE: [LOW, MEDIUM, or HIGH]"
    )
}

pub fn observe_prompt(action_result: &str, query: &str, cycle: usize, max_cycles: usize) -> String {
    format!(
        "You took an action to help answer: \"{query}\"

ACTION RESULT:
{action_result}

CYCLE: {cycle} of {max_cycles}

REFLECT:
1. What did I learn from this result?
2. Do I have enough information to answer the question?
3. If not, what else do I need?

Respond in this format:
OBSERVATION: [what you learned]
{SUFFICIENT_KEY} [YES or NO - do you have enough info?]
NEXT_STEP: [continue_searching, ready_to_synthesize, or need_different_approach]
REASONING: [explain your thinking]"
    )
}

pub fn synthesis_prompt(query: &str, evidence: &str, insights: &str, observations: &str) -> String {
    format!(
        "Based on the following personal lifelog entries, please answer the user's question.

{EVIDENCE_MARKER}
{evidence}

PRECOMPUTED INSIGHTS:
{insights}

ANALYSIS NOTES:
{observations}

USER QUESTION: {query}

Please provide:
1. Key patterns you observe in the data
2. Relevant insights that answer the question
3. 2-3 specific, actionable recommendations

Your response:"
    )
}

/// 从行协议文本中取 `KEY: value` 的 value（大小写不敏感，容忍 markdown 加粗与列表符号，取第一处非空值）
pub fn extract_field(text: &str, key: &str) -> Option<String> {
    let key = regex::escape(key.trim().trim_end_matches(':'));
    let re = regex::Regex::new(&format!(r"(?im)^[\s*#>-]*{key}\**\s*:\**(.*)$")).ok()?;
    let found = re.captures_iter(text).find_map(|cap| {
        let v = cap.get(1)?.as_str().trim().trim_matches(['*', '[', ']', '"']).trim();
        (!v.is_empty()).then(|| v.to_string())
    });
    found
}
