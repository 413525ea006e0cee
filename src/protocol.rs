//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Evaluation, QuizQuestion, Tone, WordGroup};
use crate::notice::{Notice, NoticeLevel};
use crate::session::{QuizSession, QuizState, ReviewLine};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    StartQuiz,
    SelectAnswer {
        answer: String,
    },
    Next,
    Previous,
    Submit,
    Retry,
    SpeakAudio {
        text: String,
        #[serde(default)]
        lang: Option<String>,
    },
    /// Audio for a question's word; defaults to the current question.
    PlayQuestion {
        #[serde(default)]
        index: Option<usize>,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Quiz {
        snapshot: QuizSnapshot,
    },
    Notice {
        level: NoticeLevel,
        title: String,
        description: String,
    },
    Audio {
        mime: String,
        #[serde(rename = "audioBase64")]
        audio_base64: String,
    },
    Error {
        message: String,
    },
}

impl From<Notice> for ServerWsMessage {
    fn from(n: Notice) -> Self {
        ServerWsMessage::Notice { level: n.level, title: n.title, description: n.description }
    }
}

/// A question as the learner sees it while the quiz is running. The word to
/// play is withheld; clients ask for it with `play_question`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOut {
    pub index: usize,
    pub question_text: String,
    pub options: Vec<String>,
    pub base_spelling: String,
}

/// Session view sent after every WS transition.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSnapshot {
    pub session_id: String,
    pub state: QuizState,
    pub total: usize,
    pub current_index: usize,
    pub progress: f32,
    pub unanswered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<QuestionOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Evaluation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub review: Vec<ReviewOut>,
}

/// Results review line; `userAnswer` reads "Not answered" when absent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOut {
    pub index: usize,
    pub word_to_play: String,
    pub correct_answer: String,
    pub user_answer: String,
    pub correct: bool,
}

impl From<ReviewLine> for ReviewOut {
    fn from(r: ReviewLine) -> Self {
        ReviewOut {
            index: r.index,
            word_to_play: r.word_to_play,
            correct_answer: r.correct_answer,
            user_answer: r.user_answer.unwrap_or_else(|| "Not answered".into()),
            correct: r.correct,
        }
    }
}

/// Build the public snapshot of a session.
pub fn to_snapshot(s: &QuizSession) -> QuizSnapshot {
    let current = s.current_question().map(|q| QuestionOut {
        index: s.current_index(),
        question_text: q.question_text.clone(),
        options: q.options.clone(),
        base_spelling: q.base_spelling.clone(),
    });
    let review = if s.state() == QuizState::Results {
        s.review().into_iter().map(ReviewOut::from).collect()
    } else {
        Vec::new()
    };
    QuizSnapshot {
        session_id: s.id().to_string(),
        state: s.state(),
        total: s.questions().len(),
        current_index: s.current_index(),
        progress: s.progress(),
        unanswered: s.unanswered_count(),
        selected: s.answers().get(&s.current_index()).cloned(),
        current,
        results: s.results().cloned(),
        review,
    }
}

//
// HTTP request/response DTOs
//

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct ToneOut {
    pub tone: Tone,
    pub marker: &'static str,
}

#[derive(Serialize)]
pub struct WordsOut {
    pub tones: Vec<ToneOut>,
    pub groups: Vec<WordGroup>,
}

#[derive(Serialize)]
pub struct DifficultyOut {
    pub difficulties: BTreeMap<String, u8>,
}

#[derive(Debug, Deserialize)]
pub struct QuizQuery {
    pub size: Option<usize>,
}

#[derive(Serialize)]
pub struct QuizOut {
    pub questions: Vec<QuizQuestion>,
}

#[derive(Debug, Deserialize)]
pub struct TtsQuery {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}
