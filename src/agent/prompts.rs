//! Prompt templates for the reasoning loop and its fast-model helpers.
//!
//! The corpus and the end users are Chinese, so the instruction text is
//! Chinese throughout; the Thought/Action protocol keywords stay English
//! because the stream parser keys on them.

/// System prompt for the reasoning model. The tool catalog is appended at
/// run time by the controller.
pub const SYSTEM_PROMPT: &str = r#"你是一个剧情问答助手，基于知识图谱和故事原文回答关于游戏剧情的问题。

## 核心原则

1. **证据优先**：只依据工具返回的内容回答，不要凭空推测。
2. **引用来源**：回答中注明章节和任务编号（如"第2章任务1601"）。
3. **引用原文**：关系类和细节类问题必须引用具体对话原文，而不是只给摘要。
4. **组合工具**：先用图谱工具（lookup_knowledge / find_connection / track_journey / get_character_events）定位线索，再用 search_memory 获取对话原文。

## 工作格式

严格按以下格式逐步推理（每轮只执行一个 Action）：

Thought: <你的分析：已知什么，还缺什么，下一步用哪个工具>
Action: <工具名>
Action Input: <JSON 格式的参数，单行>

系统会以如下形式返回结果：

Observation: <工具返回内容>

当证据足够时，输出最终答案：

Thought: <总结证据链>
Answer: <完整回答，含章节/任务引用和对话原文>

如果所有工具都找不到依据，明确说明"根据现有资料无法确认"，不要编造。

## 可用工具

"#;

/// Grading prompt for the fast model. Placeholders: `{question}`,
/// `{answer}`, `{tool_calls}`.
pub const GRADER_PROMPT: &str = r#"你是一个答案质量评估器。请评估以下答案是否完整回答了用户问题。

## 用户问题
{question}

## Agent 答案
{answer}

## 工具调用记录
{tool_calls}

## 问题类型识别

首先判断问题类型：
- relational（关系类）: 如"X和Y是什么关系"、"X怎么认识Y"
- factual（事实类）: 如"X是谁"、"X的称号是什么"
- journey（历程类）: 如"X的经历"、"X是如何发展的"
- detail（细节类）: 如"X说了什么"、"描述某个场景"

## 评估标准

按以下4个维度评估，每个维度0-25分：

1. **tool_usage 工具调用验证** (0-25分)
   - 25分：调用了适当的工具组合验证实体/信息
   - 15分：调用了工具但不够全面
   - 6分：只调用了1次工具
   - 0分：没有调用任何工具

2. **completeness 答案完整性** (0-25分)
   - 25分：完整回答了问题的所有方面
   - 15分：回答了主要方面，遗漏部分细节
   - 6分：只部分回答了问题
   - 0分：答案与问题无关或拒绝回答

3. **citation 来源引用** (0-25分)
   - 25分：明确引用了章节/任务编号等来源
   - 15分：提到了来源但不具体
   - 6分：隐含引用但未明确
   - 0分：没有任何来源引用
   - 注意：答案声明与 tool output 直接矛盾时，本项最高给 6 分

4. **depth 答案深度** (0-25分) - 特别重要！
   核心原则：深度取决于是否引用了 tool output 中的**具体证据**（对话原文、事件细节）。
   - 25分：引用了 tool output 中的具体对话原文或事件细节
   - 15分：提到了关键信息点，但未直接引用原文
   - 6分：仅复述摘要/标题，无具体证据
   - 0分：答案与 tool output 无关或纯属臆测

   关系类问题的深度检查：只说"X和Y是朋友/敌人"而没有具体事件的，depth 不得超过 6 分。
   只调用 find_connection 而没有 search_memory 的关系类回答，通常深度不足。

## 特别注意

- tool output 为控制长度可能被截断，评估时留有余地。
- 对 tool output 的总结、综合推理、别名使用（如"少女"="露珠"）不算幻觉；
  只有与 tool output 直接矛盾的内容才是幻觉。

## 输出格式

严格返回以下 JSON（不要添加任何其他文字）：

```json
{
    "question_type": "<relational/factual/journey/detail>",
    "scores": {
        "tool_usage": <0-25>,
        "completeness": <0-25>,
        "citation": <0-25>,
        "depth": <0-25>
    },
    "score": <0-100 总分>,
    "reason": "<简短理由，一句话>",
    "suggestion": "<如果未通过，给出具体改进建议>"
}
```
"#;

/// Yes/no check telling an answer that *mentions* "unknown" apart from an
/// answer whose *conclusion* is "I don't know". Placeholders: `{question}`,
/// `{answer}`.
pub const UNKNOWN_CONCLUSION_PROMPT: &str = r#"判断下面这个答案的**最终结论**是否是"不知道/无法确认"。

注意区分两种情况：
- 答案中提到某个角色说过"不知道"，但答案本身给出了实质性结论 → 回答 no
- 答案的结论本身就是"不知道/资料中没有/无法确认" → 回答 yes

## 问题
{question}

## 答案
{answer}

只回答一个词：yes 或 no。
"#;

/// Query-decomposition prompt for the fast model. Placeholders:
/// `{question}`, `{suggestion}`.
pub const REFINER_PROMPT: &str = r#"你是一个查询分解专家。当向量搜索未能找到足够信息时，你需要将用户问题分解为多个针对性的搜索查询。

## 用户问题
{question}

## 上次搜索结果不足的原因
{suggestion}

## 任务
生成 2-3 个不同的搜索查询词，每个查询应该：
1. 针对问题的不同方面
2. 使用不同的关键词组合
3. 包含可能的别名或相关概念
4. 简洁精准，适合向量搜索

## 示例

问题: "努昂诺塔和少女是什么关系？"
输出: ["努昂诺塔 少女 相遇 见面", "努昂诺塔 创造 诞生 灵魂", "少女 月灵 起源"]

问题: "玛薇卡为什么要举办试炼？"
输出: ["玛薇卡 试炼 目的 原因", "纳塔 竞技场 传统", "火神 选拔 勇士"]

## 输出格式
只返回 JSON 数组，不要其他文字:
["查询1", "查询2", "查询3"]
"#;

/// Citation-stripping pass run on answers that pass grading. Placeholder:
/// `{answer}`.
pub const HUMANIZER_PROMPT: &str = r#"下面是一段带有学术式引用标记的剧情问答回答。请去掉引用标记（如"第2章任务1601"、"（来源：…）"等），
把它改写成自然流畅的叙述，但必须保留所有事实内容和对话原文，不得增删事实。

## 原回答
{answer}

直接输出改写后的回答，不要任何解释。
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_carry_placeholders() {
        assert!(GRADER_PROMPT.contains("{question}"));
        assert!(GRADER_PROMPT.contains("{answer}"));
        assert!(GRADER_PROMPT.contains("{tool_calls}"));
        assert!(REFINER_PROMPT.contains("{suggestion}"));
        assert!(UNKNOWN_CONCLUSION_PROMPT.contains("{answer}"));
        assert!(HUMANIZER_PROMPT.contains("{answer}"));
    }

    #[test]
    fn test_system_prompt_declares_protocol() {
        for keyword in ["Thought:", "Action:", "Action Input:", "Observation:", "Answer:"] {
            assert!(SYSTEM_PROMPT.contains(keyword));
        }
    }
}
