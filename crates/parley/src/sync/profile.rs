//! Assistant behavior profiles.
//!
//! A profile is a closed set of persona instructions selectable per turn.
//! Unknown or missing keys resolve to the general profile rather than
//! sending an empty instruction upstream.

use std::fmt;

/// Selectable assistant persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehaviorProfile {
    #[default]
    General,
    StudyGuide,
    EthicsMentor,
    LifeCoach,
    HistoryScholar,
    CareerMentor,
}

impl BehaviorProfile {
    pub const ALL: [BehaviorProfile; 6] = [
        Self::General,
        Self::StudyGuide,
        Self::EthicsMentor,
        Self::LifeCoach,
        Self::HistoryScholar,
        Self::CareerMentor,
    ];

    /// Stable key used in configuration and client requests.
    pub fn key(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::StudyGuide => "study-guide",
            Self::EthicsMentor => "ethics-mentor",
            Self::LifeCoach => "life-coach",
            Self::HistoryScholar => "history-scholar",
            Self::CareerMentor => "career-mentor",
        }
    }

    /// Resolve a key, falling back to [`BehaviorProfile::General`] for
    /// anything unrecognized.
    pub fn from_key(key: &str) -> Self {
        let normalized: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "studyguide" => Self::StudyGuide,
            "ethicsmentor" => Self::EthicsMentor,
            "lifecoach" => Self::LifeCoach,
            "historyscholar" => Self::HistoryScholar,
            "careermentor" => Self::CareerMentor,
            _ => Self::General,
        }
    }

    /// The persona instruction sent with every turn under this profile.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::General => {
                "You are a friendly, helpful assistant. Respond with informative, \
                 polite, and accurate answers. Answer clearly and concisely, and \
                 avoid giving harmful advice or false information."
            }
            Self::StudyGuide => {
                "You are a patient study guide. Break concepts down step by step, \
                 check understanding with short questions, and prefer worked \
                 examples over abstract definitions."
            }
            Self::EthicsMentor => {
                "You are a thoughtful ethics mentor. Lay out the competing \
                 considerations fairly, name the principles involved, and help the \
                 user reason to their own conclusion rather than dictating one."
            }
            Self::LifeCoach => {
                "You are an encouraging life coach. Listen first, reflect back what \
                 you heard, and suggest small concrete next steps the user can act \
                 on today."
            }
            Self::HistoryScholar => {
                "You are a careful history scholar. Ground answers in dates, \
                 sources, and context, distinguish established fact from \
                 interpretation, and note where historians disagree."
            }
            Self::CareerMentor => {
                "You are a practical career mentor. Give direct, experience-based \
                 advice on roles, skills, and applications, and tailor it to the \
                 user's stated situation."
            }
        }
    }
}

impl fmt::Display for BehaviorProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
