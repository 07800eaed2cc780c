use uuid::Uuid;

/// The authenticated party issuing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}
