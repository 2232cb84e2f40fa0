//! Terminal rendering of the header and the sign-in steps, plus the local
//! form buffers that turn typed commands into flow intents.

use std::{fmt::Write as _, str::FromStr};

use client_core::{
    session::{Profile, UserInfo},
    AuthSnapshot, SignInState, SignInStep,
};
use shared::domain::{BindType, EntityId};

pub const SIGN_IN_PROMPT: &str = "Please Sign In";
pub const SIGN_IN_COMPLETE: &str = "You are now signed in.";
const BIND_PROMPT: &str = "Please Bind your account As";
const EMAIL_PLACEHOLDER: &str = "example@example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInReason {
    Pin,
    Unpin,
    ChangeScene,
    RoomSettings,
    CloseRoom,
    MuteUser,
    KickUser,
    AddOwner,
    RemoveOwner,
    CreateAvatar,
    RemixAvatar,
    RemixScene,
    FavoriteRoom,
    FavoriteRooms,
    Tweet,
}

impl SignInReason {
    pub fn prompt(self) -> &'static str {
        match self {
            SignInReason::Pin => "You'll need to sign in to pin objects.",
            SignInReason::Unpin => "You'll need to sign in to un-pin objects.",
            SignInReason::ChangeScene => "You'll need to sign in to change the scene.",
            SignInReason::RoomSettings => "You'll need to sign in to change the room's settings.",
            SignInReason::CloseRoom => "You'll need to sign in to close the room.",
            SignInReason::MuteUser => "You'll need to sign in to mute other users.",
            SignInReason::KickUser => "You'll need to sign in to kick other users.",
            SignInReason::AddOwner | SignInReason::RemoveOwner => {
                "You'll need to sign in to assign moderators."
            }
            SignInReason::CreateAvatar => "You'll need to sign in to create avatars.",
            SignInReason::RemixAvatar => "You'll need to sign in to remix avatars.",
            SignInReason::RemixScene => "You'll need to sign in to remix scenes.",
            SignInReason::FavoriteRoom => {
                "You'll need to sign in to add this room to your favorites."
            }
            SignInReason::FavoriteRooms => "You'll need to sign in to add favorite rooms.",
            SignInReason::Tweet => "You'll need to sign in to send tweets.",
        }
    }
}

impl FromStr for SignInReason {
    type Err = String;

    /// Accepts `change_scene`, `change-scene` and `changeScene` alike.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key: String = value
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        let reason = match key.as_str() {
            "pin" => SignInReason::Pin,
            "unpin" => SignInReason::Unpin,
            "changescene" => SignInReason::ChangeScene,
            "roomsettings" => SignInReason::RoomSettings,
            "closeroom" => SignInReason::CloseRoom,
            "muteuser" => SignInReason::MuteUser,
            "kickuser" => SignInReason::KickUser,
            "addowner" => SignInReason::AddOwner,
            "removeowner" => SignInReason::RemoveOwner,
            "createavatar" => SignInReason::CreateAvatar,
            "remixavatar" => SignInReason::RemixAvatar,
            "remixscene" => SignInReason::RemixScene,
            "favoriteroom" => SignInReason::FavoriteRoom,
            "favoriterooms" => SignInReason::FavoriteRooms,
            "tweet" => SignInReason::Tweet,
            _ => return Err(format!("unknown sign-in reason '{value}'")),
        };
        Ok(reason)
    }
}

/// `alice@example.com` -> `a***@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    if letters.is_empty() {
        "?".to_string()
    } else {
        letters
    }
}

pub fn render_user_avatar(info: &UserInfo) -> String {
    let name = info.name.as_deref().unwrap_or_default();
    match info.avatar.as_deref().filter(|avatar| !avatar.is_empty()) {
        Some(avatar) => format!("[{avatar}] {name}"),
        None => format!("({}) {name}", initials(name)),
    }
}

pub fn render_header(snapshot: &AuthSnapshot, profile: &Profile) -> String {
    let mut out = String::from("Home");
    if snapshot.is_admin {
        out.push_str(" | Admin");
    }
    out.push_str(" || ");

    if snapshot.is_signed_in {
        if snapshot.user_info.memberid.is_some() {
            let _ = write!(out, "{} ", render_user_avatar(&snapshot.user_info));
        }
        if let Some(email) = snapshot.email.as_deref() {
            let _ = write!(out, "<{}> ", mask_email(email));
        }
        out.push_str("[Sign Out]");
    } else {
        let _ = write!(
            out,
            "{} ({}) [Sign In]",
            profile.display_name, profile.avatar_id
        );
    }
    out
}

fn field(value: &str, placeholder: &str) -> String {
    if value.is_empty() {
        format!("<{placeholder}>")
    } else {
        value.to_string()
    }
}

pub fn render_bind_user(state: &SignInState, form: &BindForm) -> String {
    let mut out = String::new();

    if form.selecting_store(state) {
        out.push_str("Select your store:\n");
        for (index, store) in state.stores.iter().enumerate() {
            let marker = if form.store_id.as_ref() == Some(&store.id) {
                "*"
            } else {
                " "
            };
            let _ = writeln!(out, " {marker} {}) {}", index + 1, store.name);
        }
        out.push_str("[cancel] [next]");
        return out;
    }

    let _ = writeln!(out, "{BIND_PROMPT}");
    for bind_type in [BindType::Member, BindType::Seller] {
        let checked = if form.bind_type == bind_type { "x" } else { " " };
        let _ = write!(out, "({checked}) {}  ", bind_type.label());
    }
    out.push('\n');
    let _ = writeln!(out, "email:    {}", field(&form.email, EMAIL_PLACEHOLDER));
    let masked = "*".repeat(form.password.chars().count());
    let _ = writeln!(out, "password: {}", field(&masked, "your password"));
    if !state.message.is_empty() {
        let _ = writeln!(out, "! {}", state.message);
    }
    out.push_str("[next]");
    out
}

pub fn render_submit_email(form: &BindForm, reason: Option<SignInReason>) -> String {
    let prompt = reason.map_or(SIGN_IN_PROMPT, SignInReason::prompt);
    format!(
        "{prompt}\nemail: {}\n[cancel] [next]",
        field(&form.email, EMAIL_PLACEHOLDER)
    )
}

pub fn render_wait_for_verification(email: &str) -> String {
    format!(
        "Email sent to {email}!\n\
         To continue, click on the link in the email using your phone, tablet, or PC.\n\
         No email? You may not be able to create an account.\n\
         [cancel]"
    )
}

pub fn render_sign_in_complete() -> String {
    format!("{SIGN_IN_COMPLETE}\n[continue]")
}

pub fn render_step(state: &SignInState, form: &BindForm, reason: Option<SignInReason>) -> String {
    match state.step {
        SignInStep::Bind => render_bind_user(state, form),
        SignInStep::Submit => render_submit_email(form, reason),
        SignInStep::WaitForVerification => {
            let mut out = render_wait_for_verification(&state.email);
            if !state.message.is_empty() {
                let _ = write!(out, "\n! {}", state.message);
            }
            out
        }
        SignInStep::Complete => render_sign_in_complete(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    SetBindType(BindType),
    SetEmail(String),
    SetPassword(String),
    PickStore(usize),
    Next,
    Cancel,
    SignOut,
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(command, rest)| (command, rest.trim()));

    match command.to_ascii_lowercase().as_str() {
        "" | "next" => Input::Next,
        "type" => match rest.to_ascii_lowercase().as_str() {
            "student" | "member" | "0" => Input::SetBindType(BindType::Member),
            "teacher" | "seller" | "1" => Input::SetBindType(BindType::Seller),
            _ => Input::Unknown(line.to_string()),
        },
        "email" if !rest.is_empty() => Input::SetEmail(rest.to_string()),
        "password" if !rest.is_empty() => Input::SetPassword(rest.to_string()),
        "store" => match rest.parse::<usize>() {
            Ok(index) if index > 0 => Input::PickStore(index),
            _ => Input::Unknown(line.to_string()),
        },
        "cancel" => Input::Cancel,
        "signout" | "sign-out" => Input::SignOut,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    BindMember { email: String, password: String },
    BindSeller { email: String, password: String },
    BindStore { email: String, store_id: EntityId },
    CancelBind,
    SubmitEmail(String),
    Cancel,
    SignOut,
    Quit,
}

/// Local field buffers; nothing here is shared with the flow until an
/// intent is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindForm {
    pub email: String,
    pub password: String,
    pub bind_type: BindType,
    pub store_id: Option<EntityId>,
}

impl BindForm {
    pub fn new(state: &SignInState) -> Self {
        let mut form = Self::default();
        form.sync(state);
        form
    }

    /// Picks up the email and bind type the flow settled on.
    pub fn sync(&mut self, state: &SignInState) {
        if !state.email.is_empty() {
            self.email = state.email.clone();
        }
        self.bind_type = state.bind_type;
        if state.stores.is_empty() {
            self.store_id = None;
        }
        if state.step != SignInStep::Bind {
            self.password.clear();
        }
    }

    pub fn selecting_store(&self, state: &SignInState) -> bool {
        state.step == SignInStep::Bind
            && state.bind_type == BindType::Seller
            && !state.stores.is_empty()
    }

    /// Applies one input. `Err` carries an inline validation message.
    pub fn handle(&mut self, input: Input, state: &SignInState) -> Result<Option<Intent>, String> {
        match input {
            Input::SetBindType(bind_type) => {
                self.bind_type = bind_type;
                Ok(None)
            }
            Input::SetEmail(email) => {
                self.email = email;
                Ok(None)
            }
            Input::SetPassword(password) => {
                self.password = password;
                Ok(None)
            }
            Input::PickStore(index) => {
                let store = index
                    .checked_sub(1)
                    .and_then(|position| state.stores.get(position))
                    .ok_or_else(|| format!("no store numbered {index}"))?;
                self.store_id = Some(store.id.clone());
                Ok(None)
            }
            Input::Next => self.next(state),
            Input::Cancel => Ok(match state.step {
                SignInStep::Bind if self.selecting_store(state) => Some(Intent::CancelBind),
                SignInStep::Bind => None,
                SignInStep::Submit => Some(Intent::CancelBind),
                SignInStep::WaitForVerification | SignInStep::Complete => Some(Intent::Cancel),
            }),
            Input::SignOut => Ok(Some(Intent::SignOut)),
            Input::Quit => Ok(Some(Intent::Quit)),
            Input::Unknown(line) => Err(format!("unrecognized input '{line}'")),
        }
    }

    fn next(&self, state: &SignInState) -> Result<Option<Intent>, String> {
        match state.step {
            SignInStep::Bind if self.selecting_store(state) => {
                let store_id = self.store_id.clone().ok_or("pick a store first")?;
                Ok(Some(Intent::BindStore {
                    email: self.email.clone(),
                    store_id,
                }))
            }
            SignInStep::Bind => {
                if self.email.is_empty() {
                    return Err("email is required".into());
                }
                if self.password.is_empty() {
                    return Err("password is required".into());
                }
                let (email, password) = (self.email.clone(), self.password.clone());
                Ok(Some(match self.bind_type {
                    BindType::Member => Intent::BindMember { email, password },
                    BindType::Seller => Intent::BindSeller { email, password },
                }))
            }
            SignInStep::Submit if self.email.is_empty() => Err("email is required".into()),
            SignInStep::Submit => Ok(Some(Intent::SubmitEmail(self.email.clone()))),
            SignInStep::WaitForVerification | SignInStep::Complete => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "tests/views_tests.rs"]
mod tests;
