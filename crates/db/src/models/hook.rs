use keelson_core::Hook;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HookRow {
    pub id: String,
    pub project_id: String,
    pub hook_name: String,
}

impl HookRow {
    pub fn into_domain(self) -> Hook {
        Hook {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            hook_name: self.hook_name,
        }
    }
}
