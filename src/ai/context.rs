use std::fmt::Write as _;

use diesel::PgConnection;

use crate::error::AppResult;
use crate::models::{Note, NoteType, Person, PersonAttribute};
use crate::notes::{self, format_date};
use crate::people::attributes;

/// Notes loaded per person when assembling context.
pub const RECENT_NOTES_LIMIT: i64 = 50;
/// Notes rendered into the prompt.
pub const RECENT_EVENTS_SHOWN: usize = 5;

#[derive(Debug, Clone)]
pub struct PersonAiContext {
    pub person: Person,
    pub attributes: Vec<PersonAttribute>,
    pub recent_notes: Vec<Note>,
    pub last_meeting: Option<Note>,
}

pub fn load_person_context(conn: &mut PgConnection, person: Person) -> AppResult<PersonAiContext> {
    let attributes = attributes::list_attributes(conn, person.id)?;
    let recent_notes = notes::recent_notes(conn, person.id, RECENT_NOTES_LIMIT)?;
    let last_meeting = recent_notes
        .iter()
        .find(|note| note.note_type == NoteType::OneOnOne.as_str())
        .cloned();

    Ok(PersonAiContext {
        person,
        attributes,
        recent_notes,
        last_meeting,
    })
}

pub fn build_context_prompt(context: &PersonAiContext) -> String {
    let mut prompt = String::new();
    let person = &context.person;

    let _ = writeln!(prompt, "CONTEXT ABOUT {}:", person.name);
    if let Some(position) = non_empty(&person.position) {
        let _ = writeln!(prompt, "Position: {position}");
    }
    if let Some(department) = non_empty(&person.department) {
        let _ = writeln!(prompt, "Department: {department}");
    }

    if !context.attributes.is_empty() {
        prompt.push_str("\nATTRIBUTES:\n");
        for attribute in &context.attributes {
            let _ = writeln!(prompt, "- {}: {}", attribute.key, attribute.value);
        }
    }

    if !context.recent_notes.is_empty() {
        prompt.push_str("\nRECENT EVENTS:\n");
        for note in context.recent_notes.iter().take(RECENT_EVENTS_SHOWN) {
            let _ = writeln!(prompt, "- {}: {}", format_date(note.created_at), note.content);
        }
    }

    if let Some(meeting) = &context.last_meeting {
        let _ = writeln!(prompt, "\nLAST 1:1 MEETING: {}", format_date(meeting.created_at));
    }

    prompt
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};
    use uuid::Uuid;

    use super::*;

    fn timestamp(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn person() -> Person {
        Person {
            id: 7,
            uuid: Uuid::new_v4(),
            company_id: 1,
            name: "Ana Souza".into(),
            email: None,
            position: Some("Staff Engineer".into()),
            department: Some("  ".into()),
            phone: None,
            birthday: None,
            start_date: None,
            is_manager: false,
            manager_id: None,
            notes: None,
            has_kids: false,
            gender: None,
            interests: None,
            personality: None,
            created_by: 1,
            is_active: true,
            created_at: timestamp(1),
            updated_at: timestamp(1),
        }
    }

    fn note(id: i64, day: u32, note_type: NoteType, content: &str) -> Note {
        Note {
            id,
            uuid: Uuid::new_v4(),
            company_id: 1,
            person_id: 7,
            user_id: 1,
            note_type: note_type.as_str().into(),
            content: content.into(),
            feedback_type: None,
            feedback_category: None,
            created_at: timestamp(day),
            updated_at: timestamp(day),
            deleted_at: None,
        }
    }

    fn attribute(key: &str, value: &str) -> PersonAttribute {
        PersonAttribute {
            id: 1,
            person_id: 7,
            key: key.into(),
            value: value.into(),
            source: "manual".into(),
            source_note_id: None,
            created_at: timestamp(1),
            updated_at: timestamp(1),
        }
    }

    #[test]
    fn renders_every_section() {
        let recent: Vec<Note> = (0..7)
            .map(|i| {
                let kind = if i == 2 { NoteType::OneOnOne } else { NoteType::Observation };
                note(i, 20 - i as u32, kind, &format!("event {i}"))
            })
            .collect();
        let context = PersonAiContext {
            person: person(),
            attributes: vec![attribute("hobby", "climbing")],
            last_meeting: recent.iter().find(|n| n.note_type == "one_on_one").cloned(),
            recent_notes: recent,
        };

        let prompt = build_context_prompt(&context);

        assert!(prompt.starts_with("CONTEXT ABOUT Ana Souza:\nPosition: Staff Engineer\n"));
        assert!(!prompt.contains("Department:"));
        assert!(prompt.contains("ATTRIBUTES:\n- hobby: climbing\n"));
        assert!(prompt.contains("RECENT EVENTS:\n- 2024-04-20: event 0\n"));
        assert!(prompt.contains("- 2024-04-16: event 4\n"));
        assert!(!prompt.contains("event 5"));
        assert!(prompt.contains("LAST 1:1 MEETING: 2024-04-18"));
    }

    #[test]
    fn bare_person_only_gets_a_header() {
        let mut bare = person();
        bare.position = None;
        let context = PersonAiContext {
            person: bare,
            attributes: Vec::new(),
            recent_notes: Vec::new(),
            last_meeting: None,
        };

        assert_eq!(build_context_prompt(&context), "CONTEXT ABOUT Ana Souza:\n");
    }
}
