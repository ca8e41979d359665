use teloxide::types::{ChatId, UserId};

/// Allow-list deciding who may press the admin buttons.
///
/// The admin user id wins when configured. Without it, any press coming from the admin
/// chat is accepted. With neither configured nobody is an admin.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminPolicy {
    pub user_id: Option<UserId>,
    pub chat_id: Option<ChatId>,
}

impl AdminPolicy {
    pub fn new(user_id: Option<UserId>, chat_id: Option<ChatId>) -> Self {
        Self { user_id, chat_id }
    }

    pub fn is_admin(&self, user: UserId, origin_chat: Option<ChatId>) -> bool {
        match (self.user_id, self.chat_id) {
            (Some(admin), _) => user == admin,
            (None, Some(admin_chat)) => origin_chat == Some(admin_chat),
            (None, None) => false,
        }
    }
}
