use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

/// Declares a string-backed enumeration stored in a `VARCHAR` column.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {} '{}', expected one of: {}",
                        stringify!($name),
                        other,
                        [$($value),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(NoteType {
    OneOnOne => "one_on_one",
    Feedback => "feedback",
    Observation => "observation",
});

string_enum!(FeedbackType {
    Positive => "positive",
    Constructive => "constructive",
    Neutral => "neutral",
});

string_enum!(FeedbackCategory {
    Performance => "performance",
    Behavior => "behavior",
    Skill => "skill",
    Collaboration => "collaboration",
});

string_enum!(CompanySize {
    Small => "small",
    Medium => "medium",
    Large => "large",
    Enterprise => "enterprise",
});

string_enum!(AttributeSource {
    Manual => "manual",
    AiExtracted => "ai_extracted",
    Imported => "imported",
});

string_enum!(PromptType {
    LeadershipCoach => "leadership_coach",
    AttributeExtraction => "attribute_extraction",
});

string_enum!(RequestType {
    Chat => "chat",
    Extraction => "extraction",
    Suggestion => "suggestion",
});

string_enum!(FeedbackVerdict {
    Helpful => "helpful",
    NotHelpful => "not_helpful",
    Neutral => "neutral",
});

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub plan: String,
    pub trial_ends_at: Option<NaiveDateTime>,
    pub subscription_status: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub uuid: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub phone: Option<String>,
    pub plan: String,
    pub trial_ends_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = companies)]
#[diesel(belongs_to(User))]
pub struct Company {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub role: Option<String>,
    pub is_default: bool,
    pub user_id: i64,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany {
    pub uuid: Uuid,
    pub name: String,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub role: Option<String>,
    pub is_default: bool,
    pub user_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = people)]
#[diesel(belongs_to(Company))]
pub struct Person {
    pub id: i64,
    pub uuid: Uuid,
    pub company_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub is_manager: bool,
    pub manager_id: Option<i64>,
    pub notes: Option<String>,
    pub has_kids: bool,
    pub gender: Option<String>,
    pub interests: Option<String>,
    pub personality: Option<String>,
    pub created_by: i64,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = people)]
pub struct NewPerson {
    pub uuid: Uuid,
    pub company_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub is_manager: bool,
    pub manager_id: Option<i64>,
    pub notes: Option<String>,
    pub has_kids: bool,
    pub gender: Option<String>,
    pub interests: Option<String>,
    pub personality: Option<String>,
    pub created_by: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = notes)]
#[diesel(belongs_to(Person))]
pub struct Note {
    pub id: i64,
    pub uuid: Uuid,
    pub company_id: i64,
    pub person_id: i64,
    pub user_id: i64,
    pub note_type: String,
    pub content: String,
    pub feedback_type: Option<String>,
    pub feedback_category: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notes)]
pub struct NewNote {
    pub uuid: Uuid,
    pub company_id: i64,
    pub person_id: i64,
    pub user_id: i64,
    pub note_type: String,
    pub content: String,
    pub feedback_type: Option<String>,
    pub feedback_category: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = note_mentions)]
#[diesel(belongs_to(Note))]
pub struct NoteMention {
    pub id: i64,
    pub note_id: i64,
    pub mentioned_person_id: i64,
    pub source_person_id: i64,
    pub full_content: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = note_mentions)]
pub struct NewNoteMention<'a> {
    pub note_id: i64,
    pub mentioned_person_id: i64,
    pub source_person_id: i64,
    pub full_content: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = person_attributes)]
#[diesel(belongs_to(Person))]
pub struct PersonAttribute {
    pub id: i64,
    pub person_id: i64,
    pub key: String,
    pub value: String,
    pub source: String,
    pub source_note_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = person_attributes)]
pub struct NewPersonAttribute {
    pub person_id: i64,
    pub key: String,
    pub value: String,
    pub source: String,
    pub source_note_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = sessions)]
#[diesel(belongs_to(User))]
pub struct Session {
    pub id: i64,
    pub uuid: Uuid,
    pub user_id: i64,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub is_blocked: bool,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub uuid: Uuid,
    pub user_id: i64,
    pub refresh_token: String,
    pub user_agent: String,
    pub client_ip: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = ai_prompts)]
pub struct AiPrompt {
    pub id: i64,
    pub prompt_type: String,
    pub version: i32,
    pub prompt_text: String,
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ai_prompts)]
pub struct NewAiPrompt {
    pub prompt_type: String,
    pub version: i32,
    pub prompt_text: String,
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = ai_usage_trackers)]
pub struct AiUsageTracker {
    pub id: i64,
    pub uuid: Uuid,
    pub user_id: i64,
    pub company_id: i64,
    pub prompt_id: i64,
    pub person_id: Option<i64>,
    pub request_type: String,
    pub provider: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub tokens_used: i32,
    pub cost_usd: f64,
    pub response_time_ms: i32,
    pub feedback: Option<String>,
    pub feedback_comment: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ai_usage_trackers)]
pub struct NewAiUsageTracker {
    pub uuid: Uuid,
    pub user_id: i64,
    pub company_id: i64,
    pub prompt_id: i64,
    pub person_id: Option<i64>,
    pub request_type: String,
    pub provider: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub tokens_used: i32,
    pub cost_usd: f64,
    pub response_time_ms: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = ai_conversations)]
pub struct AiConversation {
    pub id: i64,
    pub usage_id: i64,
    pub user_message: String,
    pub ai_response: String,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ai_conversations)]
pub struct NewAiConversation<'a> {
    pub usage_id: i64,
    pub user_message: &'a str,
    pub ai_response: &'a str,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_note_types() {
        assert_eq!("one_on_one".parse::<NoteType>(), Ok(NoteType::OneOnOne));
        assert_eq!(NoteType::Feedback.as_str(), "feedback");
        assert_eq!(NoteType::ALL.len(), 3);
    }

    #[test]
    fn rejects_unknown_values_with_allowed_list() {
        let err = "epic".parse::<CompanySize>().unwrap_err();
        assert!(err.contains("small, medium, large, enterprise"));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&FeedbackVerdict::NotHelpful).unwrap();
        assert_eq!(json, "\"not_helpful\"");
    }
}
