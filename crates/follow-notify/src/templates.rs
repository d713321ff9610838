use report_core::{Analyst, User};

pub struct DigestTemplate;

impl DigestTemplate {
    /// HTML body for the one-per-user daily digest.
    pub fn render(user: &User, analysts: &[Analyst]) -> String {
        let greeting = user
            .nickname
            .as_deref()
            .map(|n| format!("Hi {n},"))
            .unwrap_or_else(|| "Hi,".to_string());

        let rows: String = analysts
            .iter()
            .enumerate()
            .map(|(i, analyst)| {
                let bg = if i % 2 == 1 {
                    r#" style="background:#f8fafc;""#
                } else {
                    ""
                };
                format!(
                    r#"  <tr{bg}><td style="padding:8px 12px;font-weight:600;">{}</td><td style="padding:8px 12px;color:#64748b;">{}</td></tr>
"#,
                    analyst.name, analyst.firm
                )
            })
            .collect();

        format!(
            r#"<div style="font-family:system-ui,sans-serif;max-width:560px;margin:0 auto;border:1px solid #e2e8f0;border-radius:8px;overflow:hidden;">
<div style="background:#3b82f6;color:#fff;padding:12px 20px;font-size:18px;font-weight:700;">New research published today</div>
<div style="padding:16px 20px;">
  <p style="color:#334155;margin:0 0 12px;">{greeting}</p>
  <p style="color:#334155;margin:0 0 12px;">Analysts you follow published new reports today:</p>
</div>
<table style="width:100%;border-collapse:collapse;">
{rows}</table>
<div style="padding:16px 20px;text-align:center;">
  <p style="color:#64748b;margin:0;font-size:12px;">You receive this because you follow these analysts.</p>
</div>
</div>"#
        )
    }
}
