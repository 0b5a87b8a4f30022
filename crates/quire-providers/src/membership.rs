//! Membership store: user accounts, passwords and lockout.
//!
//! Each user is one document named after the user name, in the
//! `urn:quire:membership` namespace of the `membership` container. Lookups
//! go through registered operations; mutations read the document, change
//! it and write it back, followed by a sync.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quire_store::{
    Bindings, Container, Document, Manager, PageWindow, QueryOperation, ResultSequence, StoreError,
    ValueType,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ProviderError, ProviderResult};
use crate::password::{self, PasswordHasher};
use crate::{blocking, total, unit};

/// Container alias used by every membership template.
pub const ALIAS: &str = "membership";

/// Namespace URI of membership documents.
pub const NAMESPACE: &str = "urn:quire:membership";

const MAX_USERNAME_LEN: usize = 256;

// ═══════════════════════════════════════════════════════════════════════
//  Settings
// ═══════════════════════════════════════════════════════════════════════

/// Membership policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipSettings {
    pub application_name: String,
    pub enable_password_reset: bool,
    pub requires_question_and_answer: bool,
    pub requires_unique_email: bool,
    pub min_password_length: usize,
    pub min_non_alphanumeric: usize,
    /// Failed validations before the account is locked.
    pub max_invalid_password_attempts: u32,
    pub password_strength_regex: Option<String>,
    pub password_hash_iterations: u32,
}

impl Default for MembershipSettings {
    fn default() -> Self {
        Self {
            application_name: "/".to_string(),
            enable_password_reset: true,
            requires_question_and_answer: false,
            requires_unique_email: false,
            min_password_length: 1,
            min_non_alphanumeric: 0,
            max_invalid_password_attempts: 5,
            password_strength_regex: None,
            password_hash_iterations: password::DEFAULT_ITERATIONS,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A membership user as seen by callers. Secrets are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipUser {
    pub username: String,
    /// Provider key, unique across users.
    pub user_key: Uuid,
    pub application: String,
    pub email: Option<String>,
    pub password_question: Option<String>,
    pub comment: Option<String>,
    pub is_approved: bool,
    pub is_locked_out: bool,
    pub creation_date: DateTime<Utc>,
    pub last_login_date: DateTime<Utc>,
    pub last_activity_date: DateTime<Utc>,
    pub last_password_changed_date: DateTime<Utc>,
    pub last_lockout_date: DateTime<Utc>,
}

/// The stored document: the public user plus its secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    #[serde(flatten)]
    user: MembershipUser,
    password_hash: String,
    password_answer_hash: Option<String>,
    #[serde(default)]
    failed_password_attempts: u32,
}

impl StoredUser {
    fn to_document(&self) -> ProviderResult<Document> {
        Ok(Document::from_serializable(&self.user.username, self)?.in_namespace(NAMESPACE))
    }
}

/// Input for [`MembershipStore::create_user`].
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub password_question: Option<String>,
    pub password_answer: Option<String>,
    pub is_approved: bool,
    /// Generated when absent.
    pub user_key: Option<Uuid>,
}

/// Why a user could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateUserStatus {
    InvalidUserName,
    InvalidPassword,
    InvalidQuestion,
    InvalidAnswer,
    InvalidEmail,
    DuplicateUserName,
    DuplicateEmail,
    DuplicateProviderUserKey,
}

impl CreateUserStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUserName => "invalid user name",
            Self::InvalidPassword => "invalid password",
            Self::InvalidQuestion => "invalid password question",
            Self::InvalidAnswer => "invalid password answer",
            Self::InvalidEmail => "invalid email",
            Self::DuplicateUserName => "duplicate user name",
            Self::DuplicateEmail => "duplicate email",
            Self::DuplicateProviderUserKey => "duplicate provider user key",
        }
    }
}

impl std::fmt::Display for CreateUserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of users plus the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct UserPage {
    pub users: Vec<MembershipUser>,
    pub total_records: u64,
}

// ═══════════════════════════════════════════════════════════════════════
//  Operations
// ═══════════════════════════════════════════════════════════════════════

const SELECT_USERS: &str = "SELECT name, content FROM membership.documents WHERE namespace = $ns";
const COUNT_USERS: &str = "SELECT count(*) FROM membership.documents WHERE namespace = $ns";
const PAGE: &str = "ORDER BY name LIMIT $end - $start + 1 OFFSET $start - 1";

fn operations() -> Vec<QueryOperation> {
    let op = |name: &str, template: String| {
        QueryOperation::builder(name, template).namespace("", NAMESPACE)
    };
    let by_name = "AND name LIKE $pattern";
    let by_email = "AND json_extract(content, '$.email') LIKE $pattern";

    vec![
        op("GetUserByName", format!("{SELECT_USERS} AND name = $user"))
            .variable("user", ValueType::String)
            .build(),
        op(
            "GetUserByObjectKey",
            format!("{SELECT_USERS} AND json_extract(content, '$.user_key') = $key"),
        )
        .variable("key", ValueType::String)
        .build(),
        op(
            "GetUserNameByEmail",
            "SELECT name FROM membership.documents WHERE namespace = $ns \
             AND lower(json_extract(content, '$.email')) = lower($email) ORDER BY name LIMIT 1"
                .to_string(),
        )
        .variable("email", ValueType::String)
        .build(),
        op("GetUsersByName", format!("{SELECT_USERS} {by_name} {PAGE}"))
            .variable("pattern", ValueType::String)
            .variable("start", ValueType::Integer)
            .variable("end", ValueType::Integer)
            .count_gated()
            .build(),
        op("CountUsersByName", format!("{COUNT_USERS} {by_name}"))
            .variable("pattern", ValueType::String)
            .count_gated()
            .build(),
        op("GetUsersByEmail", format!("{SELECT_USERS} {by_email} {PAGE}"))
            .variable("pattern", ValueType::String)
            .variable("start", ValueType::Integer)
            .variable("end", ValueType::Integer)
            .count_gated()
            .build(),
        op("CountUsersByEmail", format!("{COUNT_USERS} {by_email}"))
            .variable("pattern", ValueType::String)
            .count_gated()
            .build(),
        op("GetAllUsers", format!("{SELECT_USERS} {PAGE}"))
            .variable("start", ValueType::Integer)
            .variable("end", ValueType::Integer)
            .count_gated()
            .build(),
        op("CountAllUsers", COUNT_USERS.to_string())
            .count_gated()
            .build(),
        op(
            "CountUsersOnline",
            format!(
                "{COUNT_USERS} AND julianday(json_extract(content, '$.last_activity_date')) > julianday($since)"
            ),
        )
        .variable("since", ValueType::DateTime)
        .count_gated()
        .build(),
        op(
            "UpdateUserOnline",
            "UPDATE membership.documents \
             SET content = json_set(content, '$.last_activity_date', $at), updated_at = $stamp \
             WHERE namespace = $ns AND name = $user"
                .to_string(),
        )
        .variable("user", ValueType::String)
        .variable("at", ValueType::DateTime)
        .variable("stamp", ValueType::Integer)
        .build(),
    ]
}

// ═══════════════════════════════════════════════════════════════════════
//  MembershipStore
// ═══════════════════════════════════════════════════════════════════════

/// User accounts with password management and lockout.
#[derive(Clone)]
pub struct MembershipStore {
    container: Arc<Container>,
    settings: Arc<MembershipSettings>,
    hasher: PasswordHasher,
    strength: Option<Regex>,
}

impl MembershipStore {
    /// Open the membership container at `path` through `manager`.
    pub fn open(
        manager: &Manager,
        path: impl AsRef<Path>,
        settings: MembershipSettings,
    ) -> ProviderResult<Self> {
        let config = manager
            .default_config()
            .clone()
            .with_index("$.email")
            .with_index("$.user_key");
        let container = manager.open_container_with(path, ALIAS, config)?;
        Self::from_container(container, settings)
    }

    /// Wrap an already open container. Its alias must be [`ALIAS`].
    pub fn from_container(container: Container, settings: MembershipSettings) -> ProviderResult<Self> {
        if container.alias() != ALIAS {
            return Err(ProviderError::InvalidArgument(format!(
                "membership container must use alias `{ALIAS}`, not `{}`",
                container.alias()
            )));
        }
        container.registry().ensure_all(operations())?;
        let strength = settings
            .password_strength_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ProviderError::InvalidArgument(format!("password strength regex: {e}")))?;
        let hasher = PasswordHasher::new(settings.password_hash_iterations)?;
        info!(application = %settings.application_name, "membership store opened");
        Ok(Self {
            container: Arc::new(container),
            settings: Arc::new(settings),
            hasher,
            strength,
        })
    }

    pub fn settings(&self) -> &MembershipSettings {
        &self.settings
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Check `password` against the length, punctuation and regex policy.
    pub fn check_password_policy(&self, password: &str) -> Result<(), String> {
        if password.chars().count() < self.settings.min_password_length {
            return Err(format!(
                "password must be at least {} characters",
                self.settings.min_password_length
            ));
        }
        let non_alnum = password.chars().filter(|c| !c.is_alphanumeric()).count();
        if non_alnum < self.settings.min_non_alphanumeric {
            return Err(format!(
                "password must contain at least {} non-alphanumeric characters",
                self.settings.min_non_alphanumeric
            ));
        }
        if let Some(re) = &self.strength
            && !re.is_match(password)
        {
            return Err("password does not match the strength expression".to_string());
        }
        Ok(())
    }

    // ── creation ─────────────────────────────────────────────────────

    /// Create a new user.
    #[instrument(skip(self, new), fields(username = %new.username))]
    pub async fn create_user(&self, new: NewUser) -> ProviderResult<MembershipUser> {
        let fail = |status| Err(ProviderError::CreateUser(status));

        let username = new.username.trim().to_string();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN || username.contains(',') {
            return fail(CreateUserStatus::InvalidUserName);
        }
        if self.check_password_policy(&new.password).is_err() {
            return fail(CreateUserStatus::InvalidPassword);
        }
        if let Some(email) = &new.email
            && !email.contains('@')
        {
            return fail(CreateUserStatus::InvalidEmail);
        }
        if self.settings.requires_unique_email && new.email.is_none() {
            return fail(CreateUserStatus::InvalidEmail);
        }
        if self.settings.requires_question_and_answer {
            if new.password_question.as_deref().is_none_or(|q| q.trim().is_empty()) {
                return fail(CreateUserStatus::InvalidQuestion);
            }
            if new.password_answer.as_deref().is_none_or(|a| a.trim().is_empty()) {
                return fail(CreateUserStatus::InvalidAnswer);
            }
        }

        let now = Utc::now();
        let hasher = self.hasher;
        let stored = StoredUser {
            user: MembershipUser {
                username: username.clone(),
                user_key: new.user_key.unwrap_or_else(Uuid::now_v7),
                application: self.settings.application_name.clone(),
                email: new.email.clone(),
                password_question: new.password_question.clone(),
                comment: None,
                is_approved: new.is_approved,
                is_locked_out: false,
                creation_date: now,
                last_login_date: now,
                last_activity_date: now,
                last_password_changed_date: now,
                last_lockout_date: now,
            },
            password_hash: hasher.hash(&new.password)?,
            password_answer_hash: new
                .password_answer
                .as_deref()
                .map(|a| hasher.hash(&password::normalize_answer(a)))
                .transpose()?,
            failed_password_attempts: 0,
        };

        let unique_email = self.settings.requires_unique_email;
        let user = unit(&self.container, move |c| {
            if find_user(c, &username)?.is_some() {
                return Err(ProviderError::CreateUser(CreateUserStatus::DuplicateUserName));
            }
            let key = stored.user.user_key.to_string();
            if c.execute("GetUserByObjectKey", &Bindings::new().bind("key", key))?
                .next()
                .is_some()
            {
                return Err(ProviderError::CreateUser(CreateUserStatus::DuplicateProviderUserKey));
            }
            if unique_email
                && let Some(email) = &stored.user.email
                && name_by_email(c, email)?.is_some()
            {
                return Err(ProviderError::CreateUser(CreateUserStatus::DuplicateEmail));
            }
            c.put_document(&stored.to_document()?).map_err(|e| match e {
                StoreError::DuplicateDocument { .. } => {
                    ProviderError::CreateUser(CreateUserStatus::DuplicateUserName)
                }
                other => other.into(),
            })?;
            Ok(stored.user)
        })
        .await?;

        info!(username = %user.username, "user created");
        Ok(user)
    }

    // ── lookups ──────────────────────────────────────────────────────

    /// Fetch a user by name, optionally marking them active now.
    #[instrument(skip(self))]
    pub async fn get_user(&self, username: &str, user_is_online: bool) -> ProviderResult<Option<MembershipUser>> {
        let username = username.to_string();
        blocking(&self.container, move |c| {
            if user_is_online {
                touch(c, &username)?;
            }
            Ok(find_user(c, &username)?.map(|s| s.user))
        })
        .await
    }

    /// Fetch a user by provider key.
    #[instrument(skip(self))]
    pub async fn get_user_by_key(&self, key: Uuid, user_is_online: bool) -> ProviderResult<Option<MembershipUser>> {
        blocking(&self.container, move |c| {
            let found = c
                .execute("GetUserByObjectKey", &Bindings::new().bind("key", key.to_string()))?
                .first_document();
            let Some(doc) = found else {
                return Ok(None);
            };
            let mut stored: StoredUser = doc.deserialize()?;
            if user_is_online {
                touch(c, &stored.user.username)?;
                if let Some(fresh) = find_user(c, &stored.user.username)? {
                    stored = fresh;
                }
            }
            Ok(Some(stored.user))
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_user_name_by_email(&self, email: &str) -> ProviderResult<Option<String>> {
        let email = email.to_string();
        blocking(&self.container, move |c| name_by_email(c, &email)).await
    }

    /// Users whose name matches the SQL `LIKE` pattern.
    #[instrument(skip(self))]
    pub async fn get_users_by_name(&self, pattern: &str, page_index: i64, page_size: i64) -> ProviderResult<UserPage> {
        self.page("GetUsersByName", "CountUsersByName", Some(pattern), page_index, page_size)
            .await
    }

    /// Users whose email matches the SQL `LIKE` pattern.
    #[instrument(skip(self))]
    pub async fn get_users_by_email(&self, pattern: &str, page_index: i64, page_size: i64) -> ProviderResult<UserPage> {
        self.page("GetUsersByEmail", "CountUsersByEmail", Some(pattern), page_index, page_size)
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_all_users(&self, page_index: i64, page_size: i64) -> ProviderResult<UserPage> {
        self.page("GetAllUsers", "CountAllUsers", None, page_index, page_size)
            .await
    }

    async fn page(
        &self,
        query: &'static str,
        count: &'static str,
        pattern: Option<&str>,
        page_index: i64,
        page_size: i64,
    ) -> ProviderResult<UserPage> {
        let base = match pattern {
            Some(p) => Bindings::new().bind("pattern", p),
            None => Bindings::new(),
        };
        let window = PageWindow::new(page_index, page_size);
        blocking(&self.container, move |c| {
            let total_records = total(c.execute(count, &base)?);
            let users = c
                .execute(query, &window.bind(base))?
                .documents()
                .map(|d| d.deserialize::<StoredUser>().map(|s| s.user))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(UserPage {
                users,
                total_records,
            })
        })
        .await
    }

    /// Number of stored users.
    #[instrument(skip(self))]
    pub async fn number_of_users(&self) -> ProviderResult<u64> {
        blocking(&self.container, |c| Ok(c.count_documents()?)).await
    }

    /// Users active after `since`.
    #[instrument(skip(self))]
    pub async fn number_of_users_online(&self, since: DateTime<Utc>) -> ProviderResult<u64> {
        blocking(&self.container, move |c| {
            Ok(total(c.execute("CountUsersOnline", &Bindings::new().bind("since", since))?))
        })
        .await
    }

    // ── updates ──────────────────────────────────────────────────────

    /// Mark `username` active now.
    #[instrument(skip(self))]
    pub async fn update_user_online(&self, username: &str) -> ProviderResult<bool> {
        let username = username.to_string();
        blocking(&self.container, move |c| touch(c, &username)).await
    }

    /// Persist the caller-editable fields of `user`.
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn update_user(&self, user: &MembershipUser) -> ProviderResult<()> {
        let user = user.clone();
        let unique_email = self.settings.requires_unique_email;
        unit(&self.container, move |c| {
            let mut stored = require_user(c, &user.username)?;
            if unique_email
                && let Some(email) = &user.email
                && name_by_email(c, email)?.is_some_and(|owner| owner != user.username)
            {
                return Err(ProviderError::InvalidArgument(format!(
                    "email {email} belongs to another user"
                )));
            }
            stored.user.email = user.email;
            stored.user.comment = user.comment;
            stored.user.is_approved = user.is_approved;
            stored.user.last_login_date = user.last_login_date;
            stored.user.last_activity_date = user.last_activity_date;
            save(c, &stored)
        })
        .await
    }

    /// Check credentials.
    ///
    /// Success resets the failure counter and records the login. Each
    /// failure is counted and the account locks at the configured maximum.
    /// Unknown, unapproved and locked-out users never validate.
    #[instrument(skip(self, password))]
    pub async fn validate_user(&self, username: &str, password: &str) -> ProviderResult<bool> {
        if username.is_empty() || password.is_empty() {
            return Err(ProviderError::InvalidArgument(
                "user name and password must not be empty".into(),
            ));
        }
        let username = username.to_string();
        let password = password.to_string();
        let hasher = self.hasher;
        let max_attempts = self.settings.max_invalid_password_attempts;

        unit(&self.container, move |c| {
            let Some(mut stored) = find_user(c, &username)? else {
                debug!(username = %username, "validation of unknown user");
                return Ok(false);
            };
            if stored.user.is_locked_out || !stored.user.is_approved {
                return Ok(false);
            }

            let now = Utc::now();
            let valid = hasher.verify(&password, &stored.password_hash)?;
            if valid {
                stored.failed_password_attempts = 0;
                stored.user.last_login_date = now;
                stored.user.last_activity_date = now;
            } else {
                stored.failed_password_attempts += 1;
                if max_attempts > 0 && stored.failed_password_attempts >= max_attempts {
                    stored.user.is_locked_out = true;
                    stored.user.last_lockout_date = now;
                    warn!(username = %username, "account locked after failed validations");
                }
            }
            save(c, &stored)?;
            Ok(valid)
        })
        .await
    }

    #[instrument(skip(self, old_password, new_password))]
    pub async fn change_password(&self, username: &str, old_password: &str, new_password: &str) -> ProviderResult<()> {
        if username.is_empty() || old_password.is_empty() || new_password.is_empty() {
            return Err(ProviderError::InvalidArgument(
                "user name and passwords must not be empty".into(),
            ));
        }
        if old_password == new_password {
            return Err(ProviderError::InvalidArgument(
                "new password must differ from the old one".into(),
            ));
        }
        self.check_password_policy(new_password)
            .map_err(ProviderError::InvalidArgument)?;

        let username = username.to_string();
        let old_password = old_password.to_string();
        let new_hash = self.hasher.hash(new_password)?;
        let hasher = self.hasher;
        unit(&self.container, move |c| {
            let mut stored = require_user(c, &username)?;
            if !hasher.verify(&old_password, &stored.password_hash)? {
                return Err(ProviderError::PasswordMismatch { username });
            }
            stored.password_hash = new_hash;
            stored.user.last_password_changed_date = Utc::now();
            save(c, &stored)
        })
        .await?;

        info!("password changed");
        Ok(())
    }

    /// Replace the password with a generated one and return it.
    ///
    /// When answers are required, `answer` must match the stored answer.
    #[instrument(skip(self, answer))]
    pub async fn reset_password(&self, username: &str, answer: Option<&str>) -> ProviderResult<String> {
        if !self.settings.enable_password_reset {
            return Err(ProviderError::PasswordResetDisabled);
        }
        let length = self.settings.min_password_length.max(10);
        let fresh = password::generate_password(length, self.settings.min_non_alphanumeric)?;
        let fresh_hash = self.hasher.hash(&fresh)?;
        let hasher = self.hasher;
        let check_answer = self.settings.requires_question_and_answer;
        let username = username.to_string();
        let answer = answer.map(password::normalize_answer);

        unit(&self.container, move |c| {
            let mut stored = require_user(c, &username)?;
            if check_answer {
                let matches = match (&stored.password_answer_hash, &answer) {
                    (Some(hash), Some(given)) => hasher.verify(given, hash)?,
                    (None, None) => true,
                    _ => false,
                };
                if !matches {
                    return Err(ProviderError::PasswordMismatch { username });
                }
            }
            stored.password_hash = fresh_hash;
            stored.failed_password_attempts = 0;
            stored.user.last_password_changed_date = Utc::now();
            save(c, &stored)
        })
        .await?;

        info!("password reset");
        Ok(fresh)
    }

    #[instrument(skip(self, password, question, answer))]
    pub async fn change_password_question_and_answer(
        &self,
        username: &str,
        password: &str,
        question: &str,
        answer: &str,
    ) -> ProviderResult<()> {
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(ProviderError::InvalidArgument(format!("invalid user name `{username}`")));
        }
        if password.is_empty() {
            return Err(ProviderError::InvalidArgument("password must not be empty".into()));
        }
        if self.settings.requires_question_and_answer
            && (question.trim().is_empty() || answer.trim().is_empty())
        {
            return Err(ProviderError::InvalidArgument(
                "password question and answer are required".into(),
            ));
        }

        let username = username.to_string();
        let password = password.to_string();
        let question = question.to_string();
        let answer_hash = self.hasher.hash(&password::normalize_answer(answer))?;
        let hasher = self.hasher;
        unit(&self.container, move |c| {
            let mut stored = require_user(c, &username)?;
            if !hasher.verify(&password, &stored.password_hash)? {
                return Err(ProviderError::PasswordMismatch { username });
            }
            stored.user.password_question = Some(question);
            stored.password_answer_hash = Some(answer_hash);
            save(c, &stored)
        })
        .await
    }

    /// Clear a lockout. Returns `false` for unknown users.
    #[instrument(skip(self))]
    pub async fn unlock_user(&self, username: &str) -> ProviderResult<bool> {
        let username = username.to_string();
        unit(&self.container, move |c| {
            let Some(mut stored) = find_user(c, &username)? else {
                return Ok(false);
            };
            stored.user.is_locked_out = false;
            stored.failed_password_attempts = 0;
            save(c, &stored)?;
            Ok(true)
        })
        .await
    }

    /// Delete a user. Returns `false` if there was no such user.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, username: &str) -> ProviderResult<bool> {
        let username = username.to_string();
        unit(&self.container, move |c| Ok(c.delete_document(&username)?)).await
    }

    /// Names of every stored user, sorted.
    pub async fn user_names(&self) -> ProviderResult<BTreeSet<String>> {
        blocking(&self.container, |c| {
            Ok(c.all_documents()?.into_iter().map(|d| d.name).collect())
        })
        .await
    }

    /// Sync and close the container.
    pub async fn close(&self) -> ProviderResult<()> {
        blocking(&self.container, |c| Ok(c.close()?)).await
    }
}

// ── helpers (run on the blocking pool) ───────────────────────────────

fn first_user(seq: ResultSequence) -> ProviderResult<Option<StoredUser>> {
    seq.first_document()
        .map(|d| d.deserialize::<StoredUser>())
        .transpose()
        .map_err(Into::into)
}

fn find_user(c: &Container, username: &str) -> ProviderResult<Option<StoredUser>> {
    first_user(c.execute("GetUserByName", &Bindings::new().bind("user", username))?)
}

fn require_user(c: &Container, username: &str) -> ProviderResult<StoredUser> {
    find_user(c, username)?.ok_or_else(|| ProviderError::UserNotFound {
        username: username.to_string(),
    })
}

fn name_by_email(c: &Container, email: &str) -> ProviderResult<Option<String>> {
    Ok(c
        .execute("GetUserNameByEmail", &Bindings::new().bind("email", email))?
        .first_value()
        .and_then(|v| v.as_str().map(str::to_owned)))
}

fn touch(c: &Container, username: &str) -> ProviderResult<bool> {
    let now = Utc::now();
    let bindings = Bindings::new()
        .bind("user", username)
        .bind("at", now)
        .bind("stamp", now.timestamp_millis());
    let updated = c.with_sync(|c| c.execute("UpdateUserOnline", &bindings))?;
    Ok(updated.affected() > 0)
}

/// Write `stored` back. Callers load and save inside one [`unit`].
fn save(c: &Container, stored: &StoredUser) -> ProviderResult<()> {
    Ok(c.update_document(&stored.to_document()?)?)
}
