//! 提示词构建
//!
//! 只负责拼接文本，不调用模型

use crate::models::Question;
use crate::utils::truncate_text;

/// 追加给需要严格 JSON 的模型
const STRICT_JSON_HINT: &str =
    "IMPORTANT: OUTPUT ONLY VALID JSON. NO PREAMBLE. NO EXPLANATION TEXT OUTSIDE JSON. KEEP REASONING CONCISE.";

/// 单题批改提示词
pub fn grading_prompt(
    question: &Question,
    max_score: f64,
    answer_key: Option<&str>,
    strict_json: bool,
) -> String {
    let target = question.describe();
    let mut prompt = format!(
        "你是一名经验丰富的阅卷老师，现在只批改试卷图片中的【{target}】。\n\
         本题满分：{max_score} 分。\n"
    );

    if let Some(key) = answer_key.filter(|k| !k.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n【标准答案】（请从中找到与{target}对应的条目）：\n\
             ================\n{key}\n================\n\
             使用标准答案的规则：\n\
             1. 学生答案与标准答案一致或含义相同时，必须判为正确并给满分；即使你怀疑标准答案有误也以它为准，除非标准答案本身明显是乱码或排版损坏。\n\
             2. 选择题、判断题等客观题严格按标准答案判分。\n\
             3. 填空、简答、计算等主观题参考标准答案的要点和思路给分。\n\
             4. 标准答案里确实没有本题时才依据自己的知识判断，并在评语中注明\"标准答案中未找到本题\"。\n"
        ));
    }

    prompt.push_str(&format!(
        "\n批改要求：\n\
         1. 试卷可能是左右双栏排版，请按从左到右、从上到下的顺序在整页中查找{target}。\n\
         2. 只依据图片中真实可见的内容批改，找不到题目或看不清时给 0 分并说明原因，不要编造题目或答案。\n\
         3. 空白作答判定：如果作答区域只有印刷的题干、选项、填空横线或代码框架，而没有任何手写笔迹，视为未作答，给 0 分。\n\
         4. 认定为手写之前必须找到具体的视觉证据：笔画粗细不一、行列歪斜、间距不均、涂改或划痕、墨色深浅变化等。与印刷体字形、字号、排版完全一致的内容属于题目本身。\n\
         5. 有涂改时以学生最终保留的答案为准；无法分辨最终答案时判错，并在评语中写明\"涂改不清\"。\n\
         6. 题目含多个小问时逐一检查，未作答的小问不得分。\n\
         \n\
         评分参考：完全正确给满分；基本正确但有小错给 80%-90%；部分正确给 50%-70%；错误给 0-30%；未作答或无法识别给 0 分。\n\
         \n\
         先分析再打分。analysis 使用纯文本，不要使用 ** 或 # 等 Markdown 标记，依次写\"1. 识别题目\"、\"2. 识别学生手写答案\"、\"3. 与标准答案比对\"、\"4. 判定\"、\"5. 结论\"，小标题之间空一行；公式用行内 $...$。\n\
         \n\
         直接返回如下 JSON，不要放在代码块中：\n\
         {{\n  \"analysis\": \"详细分析（注意转义双引号）\",\n  \"score\": 0 到 {max_score} 之间的数字,\n  \"is_correct\": true 或 false,\n  \"comment\": \"简短评语\"\n}}\n"
    ));

    if strict_json {
        prompt.push('\n');
        prompt.push_str(STRICT_JSON_HINT);
    }
    prompt
}

/// 试卷结构分析提示词
pub fn structure_prompt(answer_key: Option<&str>, hint_limit: usize, strict_json: bool) -> String {
    let mut prompt = String::from(
        "你是一名阅卷老师，请分析这张试卷的题目结构。\n\
         \n\
         任务：\n\
         1. 找出试卷中的全部大题和小题，试卷多为左右双栏排版，请按从左到右、从上到下的顺序扫描整页。\n\
         2. 识别每道小题的分值：大题标题中的\"每题/每空/每小题 X 分\"适用于该大题下的所有小题；题末括号中的\"(5分)\"只属于该题。\n\
         3. 区分总分与每题分值：\"共10题，共20分\"表示每题 2 分；不要把题目数量当成分值。找不到分值时填 null。\n\
         4. box_2d 只框住题号本身（如 \"1.\" 或 \"一、\"），格式 [ymin, xmin, ymax, xmax]，取值 0-1000；无法确定时省略，不要编造。\n",
    );

    if let Some(key) = answer_key.filter(|k| !k.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n【参考信息】标准答案文档节选，可能包含题号结构与分值说明：\n\
             ================\n{}\n================\n\
             图片中分值看不清时，以上述文本中的分值为准。\n",
            truncate_text(key, hint_limit)
        ));
    }

    prompt.push_str(
        "\n只输出一个 JSON 对象，格式如下：\n\
         {\n  \"total_questions\": 12,\n  \"groups\": [\n    {\n      \"name\": \"一、填空题\",\n      \"default_score\": 1.5,\n      \"questions\": [\n        {\"id\": \"1\", \"type\": \"填空题\", \"box_2d\": [100, 50, 120, 70], \"score\": 1.5}\n      ]\n    }\n  ]\n}\n",
    );

    if strict_json {
        prompt.push('\n');
        prompt.push_str(STRICT_JSON_HINT);
    }
    prompt
}
