use crate::domain::DraftId;

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
}

/// Inline keyboard (buttons) for the draft confirmation workflow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    /// ✅ Accept / ❌ Reject row offered under a fresh draft.
    pub fn confirm_row(id: &DraftId) -> Self {
        Self::new(vec![
            InlineButton {
                label: "✅ Accept entry".to_string(),
                callback_data: PendingAction::Accept.callback_data(id),
            },
            InlineButton {
                label: "❌ Reject".to_string(),
                callback_data: PendingAction::Reject.callback_data(id),
            },
        ])
    }

    /// 🔧 Auto-fix / ❌ Reject row offered after a failed validation.
    pub fn autofix_row(id: &DraftId) -> Self {
        Self::new(vec![
            InlineButton {
                label: "🔧 Auto-fix".to_string(),
                callback_data: PendingAction::Autofix.callback_data(id),
            },
            InlineButton {
                label: "❌ Reject".to_string(),
                callback_data: PendingAction::Reject.callback_data(id),
            },
        ])
    }
}

/// Callback-data verbs for pending drafts. Wire format:
/// `pending:{action}:{draft_id}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingAction {
    Accept,
    Reject,
    Autofix,
}

impl PendingAction {
    pub fn callback_data(self, id: &DraftId) -> String {
        format!("pending:{}:{}", self.verb(), id.0)
    }

    fn verb(self) -> &'static str {
        match self {
            PendingAction::Accept => "accept",
            PendingAction::Reject => "reject",
            PendingAction::Autofix => "autofix",
        }
    }

    pub fn parse(data: &str) -> Option<(PendingAction, DraftId)> {
        let rest = data.strip_prefix("pending:")?;
        let (verb, id) = rest.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        let action = match verb {
            "accept" => PendingAction::Accept,
            "reject" => PendingAction::Reject,
            "autofix" => PendingAction::Autofix,
            _ => return None,
        };
        Some((action, DraftId(id.to_string())))
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_edit: bool,
    pub supports_chat_actions: bool,
    pub supports_inline_keyboards: bool,
    pub max_message_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_round_trips() {
        let id = DraftId("18f3a2b01".to_string());
        for action in [
            PendingAction::Accept,
            PendingAction::Reject,
            PendingAction::Autofix,
        ] {
            let data = action.callback_data(&id);
            let (parsed, parsed_id) = PendingAction::parse(&data).unwrap();
            assert_eq!(parsed, action);
            assert_eq!(parsed_id, id);
        }
    }

    #[test]
    fn parse_rejects_foreign_data() {
        assert!(PendingAction::parse("askuser:1:2").is_none());
        assert!(PendingAction::parse("pending:unknown:1").is_none());
        assert!(PendingAction::parse("pending:accept:").is_none());
        assert!(PendingAction::parse("pending:accept").is_none());
    }

    #[test]
    fn confirm_row_has_accept_and_reject() {
        let kb = InlineKeyboard::confirm_row(&DraftId("x".into()));
        assert_eq!(kb.buttons.len(), 2);
        assert_eq!(kb.buttons[0].callback_data, "pending:accept:x");
        assert_eq!(kb.buttons[1].callback_data, "pending:reject:x");
    }
}
