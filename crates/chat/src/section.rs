use serde::{Deserialize, Serialize};

/// App sections a guided search can point the user at. Each maps to a
/// stable slug the UI navigates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Contacts,
    Chat,
    Dating,
    Shops,
    Ads,
    News,
    KnowledgeBase,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::Contacts,
        Section::Chat,
        Section::Dating,
        Section::Shops,
        Section::Ads,
        Section::News,
        Section::KnowledgeBase,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Section::Contacts => "contacts",
            Section::Chat => "chat",
            Section::Dating => "dating",
            Section::Shops => "shops",
            Section::Ads => "ads",
            Section::News => "news",
            Section::KnowledgeBase => "knowledge_base",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|section| section.slug() == slug)
    }

    pub fn label(self) -> &'static str {
        match self {
            Section::Contacts => "Contacts",
            Section::Chat => "Chat",
            Section::Dating => "Dating",
            Section::Shops => "Shops",
            Section::Ads => "Ads",
            Section::News => "News",
            Section::KnowledgeBase => "Knowledge base",
        }
    }

    /// Prompt that seeds a guided-search conversation for this section.
    pub fn search_prompt(self) -> &'static str {
        match self {
            Section::Contacts => {
                "Whom would you like to find among the devotees? A name, a city, or a quality is enough."
            }
            Section::Chat => "Which conversation are you looking for? Describe it and I will help.",
            Section::Dating => {
                "Tell me what matters to you in a companion on the path, and I will help you search."
            }
            Section::Shops => "What would you like to find in the shops? Books, prasad, clothing?",
            Section::Ads => "Describe the announcement you are looking for and I will search the ads.",
            Section::News => "Which community news are you interested in?",
            Section::KnowledgeBase => {
                "Ask your question and I will search the knowledge base of scripture and practice."
            }
        }
    }
}
