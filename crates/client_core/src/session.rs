//! Client-side session store: credentials, bound profile and the anonymous
//! identity. Readers hold an `Arc<SessionStore>` and either take snapshots or
//! subscribe; every mutation goes through [`SessionUpdate`] so changes are
//! applied in one place and subscribers are notified after each one.

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::{BindType, EntityId},
    protocol::{MemberProfile, SellerAssignment, SellerProfile},
};
use tokio::sync::watch;

use crate::claims::{decode_unverified, AccountClaims};

pub const DEFAULT_AVATARS: &[&str] = &[
    "avatar-blue",
    "avatar-green",
    "avatar-orange",
    "avatar-purple",
    "avatar-red",
    "avatar-yellow",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub memberid: Option<EntityId>,
    pub sellerid: Option<EntityId>,
    pub storeid: Option<EntityId>,
    pub classroomid: Option<EntityId>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub token: Option<String>,
    pub subscription: Option<Value>,
    pub bindtype: Option<BindType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub avatar_id: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            display_name: "Guest".into(),
            avatar_id: DEFAULT_AVATARS[0].into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub credentials: Credentials,
    pub userinfo: UserInfo,
    pub profile: Profile,
}

/// Fields to merge into [`UserInfo`]; `None` leaves the current value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfoPatch {
    pub memberid: Option<EntityId>,
    pub sellerid: Option<EntityId>,
    pub storeid: Option<EntityId>,
    pub classroomid: Option<EntityId>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub token: Option<String>,
    pub subscription: Option<Value>,
    pub bindtype: Option<BindType>,
}

impl UserInfoPatch {
    pub fn member(profile: MemberProfile) -> Self {
        Self {
            memberid: Some(profile.id),
            name: profile.name,
            avatar: profile.avatar,
            token: profile.token,
            subscription: profile.subscription,
            bindtype: Some(BindType::Member),
            ..Self::default()
        }
    }

    pub fn seller(profile: &SellerProfile) -> Self {
        Self {
            memberid: Some(profile.id.clone()),
            name: profile.name.clone(),
            avatar: profile.avatar.clone(),
            token: profile.token.clone(),
            bindtype: Some(BindType::Seller),
            ..Self::default()
        }
    }

    pub fn store(store_id: EntityId, assignment: SellerAssignment) -> Self {
        Self {
            sellerid: Some(assignment.id),
            classroomid: assignment.classroom_id,
            storeid: Some(store_id),
            bindtype: Some(BindType::Seller),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    SetCredentials(Credentials),
    ClearCredentials,
    MergeUserInfo(UserInfoPatch),
    ClearUserInfo,
    SetProfile(Profile),
}

impl SessionState {
    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::SetCredentials(credentials) => self.credentials = credentials,
            SessionUpdate::ClearCredentials => self.credentials = Credentials::default(),
            SessionUpdate::MergeUserInfo(patch) => merge_user_info(&mut self.userinfo, patch),
            SessionUpdate::ClearUserInfo => self.userinfo = UserInfo::default(),
            SessionUpdate::SetProfile(profile) => self.profile = profile,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.credentials
            .token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

fn merge_user_info(info: &mut UserInfo, patch: UserInfoPatch) {
    fn merge<T>(slot: &mut Option<T>, value: Option<T>) {
        if value.is_some() {
            *slot = value;
        }
    }

    merge(&mut info.memberid, patch.memberid);
    merge(&mut info.sellerid, patch.sellerid);
    merge(&mut info.storeid, patch.storeid);
    merge(&mut info.classroomid, patch.classroomid);
    merge(&mut info.name, patch.name);
    merge(&mut info.avatar, patch.avatar);
    merge(&mut info.token, patch.token);
    merge(&mut info.subscription, patch.subscription);
    merge(&mut info.bindtype, patch.bindtype);
}

pub struct SessionStore {
    state: watch::Sender<SessionState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionState::default())
    }
}

impl SessionStore {
    pub fn new(initial: SessionState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn update(&self, update: SessionUpdate) {
        self.state.send_modify(|state| state.apply(update));
    }

    pub fn clear_user_info(&self) {
        self.update(SessionUpdate::ClearUserInfo);
    }

    pub fn reset_to_random_default_avatar(&self) {
        let avatar_id = DEFAULT_AVATARS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(DEFAULT_AVATARS[0]);
        let mut profile = self.state.borrow().profile.clone();
        profile.avatar_id = avatar_id.to_string();
        self.update(SessionUpdate::SetProfile(profile));
    }

    /// Token of the bound profile; this is what authenticates REST calls.
    pub fn user_token(&self) -> Option<String> {
        self.state
            .borrow()
            .userinfo
            .token
            .clone()
            .filter(|token| !token.is_empty())
    }

    /// `sub` claim of the credentials token, if one is present and readable.
    pub fn credentials_account_id(&self) -> Option<String> {
        let token = self.state.borrow().credentials.token.clone()?;
        decode_unverified::<AccountClaims>(&token)
            .ok()
            .map(|claims| claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;

    fn member_profile() -> MemberProfile {
        serde_json::from_value(json!({"id": 1, "name": "A", "token": "t"})).expect("profile")
    }

    #[test]
    fn member_patch_merges_without_touching_other_fields() {
        let store = SessionStore::default();
        store.update(SessionUpdate::MergeUserInfo(UserInfoPatch {
            classroomid: Some(EntityId::from("room-1")),
            ..UserInfoPatch::default()
        }));

        store.update(SessionUpdate::MergeUserInfo(UserInfoPatch::member(
            member_profile(),
        )));

        let info = store.snapshot().userinfo;
        assert_eq!(info.memberid, Some(EntityId::Number(1)));
        assert_eq!(info.name.as_deref(), Some("A"));
        assert_eq!(info.token.as_deref(), Some("t"));
        assert_eq!(info.bindtype, Some(BindType::Member));
        assert_eq!(info.classroomid, Some(EntityId::from("room-1")));
        assert_eq!(store.user_token().as_deref(), Some("t"));
    }

    #[test]
    fn clear_user_info_drops_member_id() {
        let store = SessionStore::default();
        store.update(SessionUpdate::MergeUserInfo(UserInfoPatch::member(
            member_profile(),
        )));

        store.clear_user_info();

        assert_eq!(store.snapshot().userinfo, UserInfo::default());
        assert_eq!(store.user_token(), None);
    }

    #[test]
    fn random_avatar_comes_from_default_set() {
        let store = SessionStore::default();
        store.reset_to_random_default_avatar();
        let profile = store.snapshot().profile;
        assert!(DEFAULT_AVATARS.contains(&profile.avatar_id.as_str()));
        assert_eq!(profile.display_name, "Guest");
    }

    #[test]
    fn account_id_comes_from_credentials_subject() {
        let token = encode(
            &Header::default(),
            &json!({"sub": "3141"}),
            &EncodingKey::from_secret(b"secret"),
        )
        .expect("token");
        let store = SessionStore::default();
        assert_eq!(store.credentials_account_id(), None);

        store.update(SessionUpdate::SetCredentials(Credentials {
            token: Some(token),
            email: Some("a@b.com".into()),
        }));

        assert!(store.snapshot().is_signed_in());
        assert_eq!(store.credentials_account_id().as_deref(), Some("3141"));
    }

    #[tokio::test]
    async fn subscribers_see_each_update() {
        let store = SessionStore::default();
        let mut rx = store.subscribe();

        store.update(SessionUpdate::SetCredentials(Credentials {
            token: Some("tok".into()),
            email: None,
        }));

        rx.changed().await.expect("notified");
        assert_eq!(rx.borrow().credentials.token.as_deref(), Some("tok"));
    }
}
