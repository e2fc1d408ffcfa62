use crate::storage::models::{parse_timestamp, Chat, Material, ResearchTopic, UpdateRecord};

pub const NO_CHATS: &str = "No recent chats found.";
pub const NO_MATERIALS: &str = "No new research materials found.";
pub const NO_TOPIC_MATERIALS: &str = "No new materials found for this topic.";
pub const NO_TOPICS: &str = "No research topics are being tracked.";

/// 邮件标题，带推送日期
pub fn email_subject(record: &UpdateRecord) -> String {
    format!(
        "ChatGPT Assistant Daily Update - {}",
        record.timestamp.format("%Y-%m-%d")
    )
}

/// 把一轮推送渲染成 HTML 邮件正文
pub fn render_update_html(record: &UpdateRecord) -> String {
    let mut html = format!(r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>ChatGPT Assistant Daily Update</title>
<style>
body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 20px; }}
h1, h2, h3 {{ color: #2c3e50; }}
.section {{ margin-bottom: 30px; border-bottom: 1px solid #eee; padding-bottom: 20px; }}
.chat-item, .topic-item, .update-item {{ margin-bottom: 15px; padding: 15px; background-color: #f9f9f9; border-radius: 5px; }}
.chat-title {{ font-weight: bold; color: #3498db; }}
.chat-date, .update-date {{ color: #7f8c8d; font-size: 0.9em; }}
.topic-name {{ font-weight: bold; color: #2ecc71; }}
.update-title {{ font-weight: bold; color: #e74c3c; }}
.update-link {{ color: #3498db; text-decoration: none; }}
.no-items {{ font-style: italic; color: #7f8c8d; }}
</style>
</head>
<body>
<h1>ChatGPT Assistant Daily Update</h1>
<p>Generated on {generated}</p>
"#, generated = record.timestamp.format("%Y-%m-%d %H:%M:%S"));

    html.push_str("<div class=\"section\">\n<h2>Recent Chats</h2>\n");
    if record.chats.is_empty() {
        push_placeholder(&mut html, NO_CHATS);
    }
    for chat in &record.chats {
        push_chat(&mut html, chat);
    }
    html.push_str("</div>\n");

    html.push_str("<div class=\"section\">\n<h2>New Research Materials</h2>\n");
    if record.topic_updates.is_empty() {
        push_placeholder(&mut html, NO_MATERIALS);
    }
    for (topic_name, materials) in &record.topic_updates {
        html.push_str(&format!(
            "<div class=\"topic-item\">\n<div class=\"topic-name\">{}</div>\n",
            html_escape(topic_name)
        ));
        if materials.is_empty() {
            push_placeholder(&mut html, NO_TOPIC_MATERIALS);
        }
        for material in materials {
            push_material(&mut html, material);
        }
        html.push_str("</div>\n");
    }
    html.push_str("</div>\n");

    html.push_str("<div class=\"section\">\n<h2>All Tracked Research Topics</h2>\n");
    if record.all_topics.is_empty() {
        push_placeholder(&mut html, NO_TOPICS);
    }
    for topic in &record.all_topics {
        push_topic(&mut html, topic);
    }
    html.push_str("</div>\n");

    html.push_str("</body>\n</html>\n");
    html
}

fn push_placeholder(html: &mut String, text: &str) {
    html.push_str(&format!("<p class=\"no-items\">{}</p>\n", text));
}

fn push_chat(html: &mut String, chat: &Chat) {
    let topics = if chat.topics.is_empty() {
        "No topics extracted".to_string()
    } else {
        chat.topics.join(", ")
    };

    html.push_str(&format!(
        r#"<div class="chat-item">
<div class="chat-title">{title}</div>
<div class="chat-date">{date}</div>
<p>Topics: {topics}</p>
<p>Messages: {messages}</p>
</div>
"#,
        title = html_escape(&chat.title),
        date = chat.created_at.format("%Y-%m-%d %H:%M:%S"),
        topics = html_escape(&topics),
        messages = chat.messages.len(),
    ));
}

fn push_material(html: &mut String, material: &Material) {
    // 能解析的日期只显示年月日，否则原样输出
    let published = match material.date.as_deref() {
        Some(raw) => parse_timestamp(raw)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| raw.to_string()),
        None => "Unknown date".to_string(),
    };
    let link = if material.link.is_empty() {
        "#"
    } else {
        material.link.as_str()
    };

    html.push_str(&format!(
        r#"<div class="update-item">
<div class="update-title">{title}</div>
<div class="update-date">Published: {published}</div>
<p>{snippet}</p>
<a href="{link}" class="update-link" target="_blank">Read More</a>
</div>
"#,
        title = html_escape(material.title.as_deref().unwrap_or("Untitled")),
        published = html_escape(&published),
        snippet = html_escape(
            material
                .snippet
                .as_deref()
                .unwrap_or("No description available")
        ),
        link = html_escape(link),
    ));
}

fn push_topic(html: &mut String, topic: &ResearchTopic) {
    html.push_str(&format!(
        r#"<div class="topic-item">
<div class="topic-name">{name}</div>
<div class="update-date">Last checked: {checked}</div>
<p>Sources: {sources}</p>
<p>New materials: {materials}</p>
</div>
"#,
        name = html_escape(&topic.name),
        checked = topic.last_checked.format("%Y-%m-%d %H:%M:%S"),
        sources = topic.sources.len(),
        materials = topic.new_materials.len(),
    ));
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
