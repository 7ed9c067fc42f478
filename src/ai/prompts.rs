use chrono::Utc;
use diesel::prelude::*;
use diesel::PgConnection;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{AiPrompt, PromptType};
use crate::schema::ai_prompts;

pub fn active_prompt(conn: &mut PgConnection, prompt_type: PromptType) -> AppResult<AiPrompt> {
    ai_prompts::table
        .filter(ai_prompts::prompt_type.eq(prompt_type.as_str()))
        .filter(ai_prompts::is_active.eq(true))
        .select(AiPrompt::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| {
            AppError::unprocessable(format!("no active prompt configured for {prompt_type}"))
        })
}

pub fn list_prompts(conn: &mut PgConnection) -> AppResult<Vec<AiPrompt>> {
    ai_prompts::table
        .select(AiPrompt::as_select())
        .order((ai_prompts::prompt_type.asc(), ai_prompts::version.desc()))
        .load(conn)
        .map_err(AppError::from)
}

/// Makes `prompt_id` the single active prompt of its type. Every row of the
/// type is locked first, so concurrent activations serialise and the
/// last one wins.
pub fn activate_prompt(conn: &mut PgConnection, prompt_id: i64) -> AppResult<AiPrompt> {
    conn.transaction::<AiPrompt, AppError, _>(|conn| {
        let target: AiPrompt = ai_prompts::table
            .find(prompt_id)
            .select(AiPrompt::as_select())
            .first(conn)?;

        let _locked: Vec<i64> = ai_prompts::table
            .filter(ai_prompts::prompt_type.eq(&target.prompt_type))
            .select(ai_prompts::id)
            .for_update()
            .load(conn)?;

        let now = Utc::now().naive_utc();
        let deactivated = diesel::update(
            ai_prompts::table
                .filter(ai_prompts::prompt_type.eq(&target.prompt_type))
                .filter(ai_prompts::is_active.eq(true))
                .filter(ai_prompts::id.ne(target.id)),
        )
        .set((
            ai_prompts::is_active.eq(false),
            ai_prompts::updated_at.eq(now),
        ))
        .execute(conn)?;

        let activated: AiPrompt = diesel::update(ai_prompts::table.find(target.id))
            .set((ai_prompts::is_active.eq(true), ai_prompts::updated_at.eq(now)))
            .returning(AiPrompt::as_returning())
            .get_result(conn)?;

        info!(
            prompt_id = activated.id,
            prompt_type = %activated.prompt_type,
            version = activated.version,
            deactivated,
            "prompt activated"
        );
        Ok(activated)
    })
}
