//! Mailing messages.
//!
//! A [`Message`] combines a stored message (or an ad-hoc custom one) with its
//! template, resolves `{VARIABLE}` placeholders per recipient and builds the
//! audience query from the message's mailing lists and criteria.
//!
//! # Variables
//!
//! Three layers are merged when rendering, highest precedence first:
//!
//! 1. custom variables set by the caller
//! 2. internal variables declared in the template body as `{NAME=value}`
//! 3. default variables (recipient, unsubscribe link, tracking image)

use crate::{
    config::Configuration,
    db::DbPool,
    error::AppError,
    models::{tracker, user::User},
    query::{
        Condition, Conditions, Join, SelectField, SelectQuery,
        criteria::{criteria_variables, replace_criteria_variables},
    },
    view::{
        language::translate,
        markup::{self, Variables},
    },
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;

/// Where the message body goes inside a template.
pub const CONTENT_BODY: &str = "{CONTENT_BODY}";

/// Tags every outgoing message should carry.
const REQUIRED_TAGS: [&str; 2] = ["{UNSUBSCRIBE}", "{TRACKING_IMAGE}"];

static TEMPLATE_VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{([a-z_]+)=(.*?)\}").expect("valid template variable regex")
});

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct MessageRecord {
    pub message_id: i64,
    pub template_id: i64,
    pub subject: String,
    pub body: String,
    pub never_resend: bool,
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct MessageTemplate {
    pub template_id: i64,
    pub subject: String,
    pub body: String,
}

impl MessageTemplate {
    fn fallback(site_name: &str) -> Self {
        Self {
            template_id: 0,
            subject: format!("A message from {}", site_name),
            body: CONTENT_BODY.to_string(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct MessageList {
    pub message_list_id: i64,
    pub name: String,
}

/// A criteria row linked to a message, with the link's field values.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct Criteria {
    pub message_criteria_id: i64,
    pub criteria_name: Option<String>,
    pub join_fragment: Option<String>,
    pub where_fragment: Option<String>,
    pub select_fragment: Option<String>,
    pub group_by_fragment: Option<String>,
    pub having_fragment: Option<String>,
    pub field_values: Option<String>,
}

/// Site values a message needs to render.
#[derive(Debug, Clone, Default)]
pub struct MessageSettings {
    pub site_name: String,
    pub web_root: String,
    pub tracker_key: String,
    pub default_name: String,
}

impl MessageSettings {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            site_name: config.get_str("site.name").unwrap_or_default().to_string(),
            web_root: config.get_str("web_root").unwrap_or_default().to_string(),
            tracker_key: config.get_str("tracker.key").unwrap_or_default().to_string(),
            default_name: config
                .get_str("mailer.default_name")
                .filter(|name| !name.is_empty())
                .unwrap_or("friend")
                .to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    record: MessageRecord,
    template: MessageTemplate,
    settings: MessageSettings,
    /// Automatic sends never go to a user twice.
    auto: bool,
    /// Whether the unsubscribe footer is rendered.
    unsubscribe: bool,
    test: bool,
    combined_template: String,
    custom_variables: Variables,
    internal_variables: Variables,
    default_variables: Variables,
    user: Option<User>,
    lists: Option<Vec<i64>>,
    criteria: Option<Vec<Criteria>>,
    /// ID of the "Email Sent" tracker, used to skip previous recipients.
    message_sent_id: i64,
}

impl Message {
    /// Build a message from already loaded rows.
    pub fn from_parts(
        record: MessageRecord,
        template: MessageTemplate,
        settings: MessageSettings,
        unsubscribe: bool,
        auto: bool,
    ) -> Self {
        let mut message = Self {
            record,
            template,
            settings,
            auto,
            unsubscribe,
            test: false,
            combined_template: String::new(),
            custom_variables: Variables::new(),
            internal_variables: Variables::new(),
            default_variables: Variables::new(),
            user: None,
            lists: None,
            criteria: None,
            message_sent_id: 0,
        };
        message.set_combined_template();
        message
    }

    /// Load a stored message and its template.
    ///
    /// # Errors
    ///
    /// `NotFound` when the message does not exist.
    pub async fn load(
        pool: &DbPool,
        config: &Configuration,
        message_id: i64,
        unsubscribe: bool,
        auto: bool,
    ) -> Result<Self, AppError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            "SELECT message_id, template_id, subject, body, never_resend FROM message WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)?;

        let settings = MessageSettings::from_config(config);
        let template = load_template(pool, record.template_id, &settings.site_name).await?;

        let mut message = Self::from_parts(record, template, settings, unsubscribe, auto);
        message.message_sent_id = tracker::get_tracker_id(pool, tracker::EMAIL_SENT).await?;
        Ok(message)
    }

    /// An ad-hoc message (e.g. a contact form notification) using the
    /// configured mail template.
    pub async fn custom(
        pool: &DbPool,
        config: &Configuration,
        subject: &str,
        body: &str,
    ) -> Result<Self, AppError> {
        let settings = MessageSettings::from_config(config);
        let template_id = config.get_i64("mailer.mail_template").unwrap_or_default();
        let template = load_template(pool, template_id, &settings.site_name).await?;

        let record = MessageRecord {
            subject: subject.to_string(),
            body: body.to_string(),
            ..MessageRecord::default()
        };
        Ok(Self::from_parts(record, template, settings, false, false))
    }

    pub fn is_custom(&self) -> bool {
        self.record.message_id == 0
    }

    fn set_combined_template(&mut self) {
        let mut combined = combine_template(&self.template.body, &self.record.body);
        self.internal_variables = extract_template_variables(&mut combined);
        self.combined_template = combined;
    }

    pub fn set_test(&mut self, test: bool) {
        self.test = test;
    }

    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    pub fn set_custom_variable(&mut self, name: &str, value: impl Into<String>) {
        self.custom_variables.insert(name.to_string(), value.into());
    }

    pub fn reset_custom_variables(&mut self) {
        self.custom_variables.clear();
    }

    /// Compute the default variables for the current user, including the
    /// signed tracking image.
    pub async fn set_default_vars(
        &mut self,
        pool: &DbPool,
        extra: Option<Variables>,
    ) -> Result<(), AppError> {
        let tracking_image = if self.is_custom() {
            String::new()
        } else {
            tracker::tracker_image(
                pool,
                &self.settings.tracker_key,
                &self.settings.web_root,
                tracker::EMAIL_OPENED,
                self.record.message_id,
                self.user.as_ref().map(|u| u.user_id).unwrap_or_default(),
            )
            .await?
        };
        self.apply_default_vars(tracking_image, extra);
        Ok(())
    }

    fn apply_default_vars(&mut self, tracking_image: String, extra: Option<Variables>) {
        let mut vars = Variables::new();
        let user = self.user.as_ref().filter(|u| u.user_id > 0);

        if self.is_custom() {
            vars.insert("TRACKING_IMAGE".into(), String::new());
            vars.extend(extra.unwrap_or_default());
        } else {
            vars.insert("MESSAGE_ID".into(), self.record.message_id.to_string());
            vars.insert(
                "URL_KEY".into(),
                user.map(|u| User::url_key(u.user_id, &u.salt))
                    .unwrap_or_default(),
            );
            if self.unsubscribe {
                if let Some(user) = user {
                    vars.insert("UNSUBSCRIBE".into(), self.unsubscribe_text(user));
                }
            }
            vars.insert("TRACKING_IMAGE".into(), tracking_image);
        }

        if let Some(user) = &self.user {
            let (full_name, first_name) = if user.first.is_empty() {
                let name = self.settings.default_name.clone();
                (name.clone(), name)
            } else {
                (user.full_name(), user.first.clone())
            };
            let unsubscribe = if self.unsubscribe {
                self.unsubscribe_text(user)
            } else {
                String::new()
            };
            let per_user = [
                ("FULL_NAME", full_name),
                ("FIRST_NAME", first_name),
                ("LAST_NAME", user.last.clone()),
                ("USER_ID", user.user_id.to_string()),
                ("EMAIL", user.email.clone()),
                ("UNSUBSCRIBE", unsubscribe),
            ];
            for (name, value) in per_user {
                vars.entry(name.to_string()).or_insert(value);
            }
        }

        // Placeholders the message uses but nothing set render empty.
        vars.entry("UNSUBSCRIBE".into()).or_default();

        self.default_variables = vars;
    }

    fn unsubscribe_text(&self, user: &User) -> String {
        if user.user_id == 0 {
            return String::new();
        }
        translate(
            "unsubscribe",
            &[("{LINK}", &user.unsubscribe_link(&self.settings.web_root))],
        )
    }

    /// Replace placeholders with custom, internal then default variables.
    pub fn replace_variables(&self, source: &str) -> String {
        let mut vars = self.default_variables.clone();
        vars.extend(self.internal_variables.clone());
        vars.extend(self.custom_variables.clone());
        markup::render(source, &vars)
    }

    pub fn subject(&self) -> String {
        let subject = if self.record.subject.is_empty() {
            &self.template.subject
        } else {
            &self.record.subject
        };
        let subject = self.replace_variables(subject);
        if self.test {
            format!("TEST {}", subject)
        } else {
            subject
        }
    }

    pub fn body(&self) -> String {
        self.replace_variables(&self.combined_template)
    }

    /// Mailing lists the message goes to.
    pub async fn load_lists(&mut self, pool: &DbPool) -> Result<&[i64], AppError> {
        if self.lists.is_none() {
            let lists = sqlx::query_scalar::<_, i64>(
                "SELECT message_list_id FROM message_message_list WHERE message_id = $1 ORDER BY message_list_id",
            )
            .bind(self.record.message_id)
            .fetch_all(pool)
            .await?;
            self.lists = Some(lists);
        }
        Ok(self.lists.as_deref().unwrap_or_default())
    }

    pub async fn load_criteria(&mut self, pool: &DbPool) -> Result<&[Criteria], AppError> {
        if self.criteria.is_none() {
            let criteria = SelectQuery::from_table("message_message_criteria")
                .join(Join::left_using("message_criteria", "message_criteria_id"))
                .filter(Conditions::and().equals("message_id", self.record.message_id))
                .fetch_all_as::<Criteria>(pool)
                .await?;
            self.criteria = Some(criteria);
        }
        Ok(self.criteria.as_deref().unwrap_or_default())
    }

    /// The audience query for this message.
    ///
    /// # Errors
    ///
    /// `NoMailingLists` when the message has no list, `InvalidQuery` when a
    /// criteria fragment cannot be parsed.
    pub async fn users_query(&mut self, pool: &DbPool) -> Result<SelectQuery, AppError> {
        let lists = self.load_lists(pool).await?.to_vec();
        let criteria = self.load_criteria(pool).await?.to_vec();
        let skip_sent = (self.auto || self.record.never_resend)
            .then_some((self.message_sent_id, self.record.message_id));
        build_users_query(&lists, &criteria, skip_sent, Utc::now())
    }

    /// Every recipient of the message.
    pub async fn get_users(&mut self, pool: &DbPool) -> Result<Vec<User>, AppError> {
        let mut query = self.users_query(pool).await?;
        select_users(&mut query);
        Ok(query.fetch_all_as::<User>(pool).await?)
    }

    pub async fn get_users_count(&mut self, pool: &DbPool) -> Result<i64, AppError> {
        let query = self.users_query(pool).await?;
        Ok(count_query(query).fetch_scalar_i64(pool).await?)
    }
}

async fn load_template(
    pool: &DbPool,
    template_id: i64,
    site_name: &str,
) -> Result<MessageTemplate, AppError> {
    if template_id <= 0 {
        return Ok(MessageTemplate::fallback(site_name));
    }
    let template = sqlx::query_as::<_, MessageTemplate>(
        "SELECT template_id, subject, body FROM message_template WHERE template_id = $1",
    )
    .bind(template_id)
    .fetch_optional(pool)
    .await?;

    Ok(template.unwrap_or_else(|| {
        tracing::warn!(template_id, "Message template missing, using the default");
        MessageTemplate::fallback(site_name)
    }))
}

/// Put the message body into the template's `{CONTENT_BODY}` slot.
///
/// Required tags missing from the result are appended after the content.
/// Templates without a slot are ignored and the body is used alone.
pub fn combine_template(template_body: &str, message_body: &str) -> String {
    if !template_body.contains(CONTENT_BODY) {
        return message_body.to_string();
    }

    let combined = template_body.replace(CONTENT_BODY, message_body);
    let missing: String = REQUIRED_TAGS
        .iter()
        .filter(|tag| !combined.contains(*tag))
        .copied()
        .collect();
    if missing.is_empty() {
        combined
    } else {
        template_body.replace(CONTENT_BODY, &format!("{}{}", message_body, missing))
    }
}

/// Strip `{NAME=value}` declarations from `body` and return them.
pub fn extract_template_variables(body: &mut String) -> Variables {
    let mut variables = Variables::new();
    for captures in TEMPLATE_VARIABLE.captures_iter(body) {
        variables.insert(captures[1].to_string(), captures[2].to_string());
    }
    if !variables.is_empty() {
        *body = TEMPLATE_VARIABLE.replace_all(body, "").into_owned();
    }
    variables
}

/// Build the audience query from list IDs and criteria.
///
/// `skip_sent` is `(email_sent_tracker_id, message_id)`; when set, users who
/// already received the message are excluded.
pub fn build_users_query(
    lists: &[i64],
    criteria: &[Criteria],
    skip_sent: Option<(i64, i64)>,
    now: DateTime<Utc>,
) -> Result<SelectQuery, AppError> {
    if lists.is_empty() {
        return Err(AppError::NoMailingLists);
    }

    let mut query = SelectQuery::from_table("message_list_user")
        .join(Join::inner(
            "users",
            Conditions::and().equals_column("users.user_id", "message_list_user.user_id"),
        ))
        .filter(Conditions::and().is_in(
            "message_list_user.message_list_id",
            lists.iter().map(|id| (*id).into()).collect(),
        ));

    if let Some((tracker_id, message_id)) = skip_sent {
        query = query
            .join(Join::left(
                "tracker_event",
                Conditions::and()
                    .equals_column("tracker_event.user_id", "users.user_id")
                    .equals("tracker_event.tracker_id", tracker_id)
                    .equals("tracker_event.sub_id", message_id),
            ))
            .filter(Conditions::and().is_null("tracker_event.user_id"));
    }

    for item in criteria {
        apply_criteria(&mut query, item, now)?;
    }

    Ok(query)
}

fn non_empty(fragment: &Option<String>) -> Option<&str> {
    fragment
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
}

/// Parse a fragment as a JSON object or array.
fn structured(fragment: &str) -> Option<Value> {
    serde_json::from_str::<Value>(fragment)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn apply_criteria(
    query: &mut SelectQuery,
    criteria: &Criteria,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let variables = criteria_variables(criteria.field_values.as_deref(), now);

    if let Some(join) = non_empty(&criteria.join_fragment) {
        match structured(join) {
            Some(mut value) => {
                replace_criteria_variables(&mut value, &variables);
                match value {
                    // A list of join definitions, keyed or positional.
                    Value::Array(items)
                        if items.first().is_some_and(|f| f.is_object() || f.is_array()) =>
                    {
                        for item in &items {
                            query.joins.push(Join::from_json(item)?);
                        }
                    }
                    single => query.joins.push(Join::from_json(&single)?),
                }
            }
            None => query.joins.push(Join::left(
                join,
                Conditions::and().equals_column(&format!("{}.user_id", join), "users.user_id"),
            )),
        }
    }

    if let Some(filter) = non_empty(&criteria.where_fragment) {
        let condition = match structured(filter) {
            Some(mut value) => {
                replace_criteria_variables(&mut value, &variables);
                Condition::Group(Conditions::from_json(&value)?)
            }
            None => {
                let mut raw = Value::String(filter.to_string());
                replace_criteria_variables(&mut raw, &variables);
                Condition::Raw(raw.as_str().unwrap_or(filter).to_string())
            }
        };
        query.conditions.push(condition);
    }

    if let Some(select) = non_empty(&criteria.select_fragment) {
        match structured(select) {
            Some(value) => query.merge_select_json(&value)?,
            None => query.add_select(None, SelectField::Expression(select.to_string())),
        }
    }

    if let Some(group_by) = non_empty(&criteria.group_by_fragment) {
        match structured(group_by) {
            Some(value) => query.merge_group_by_json(&value)?,
            None => query
                .group_by
                .push(SelectField::Expression(group_by.to_string())),
        }
    }

    if let Some(having) = non_empty(&criteria.having_fragment) {
        let condition = match structured(having) {
            Some(value) => Condition::Group(Conditions::from_json(&value)?),
            None => Condition::Raw(having.to_string()),
        };
        query.having.push(condition);
    }

    Ok(())
}

/// Select each recipient once with their user columns.
pub fn select_users(query: &mut SelectQuery) {
    query.distinct = true;
    query.add_select(Some("uid"), SelectField::Column("users.user_id".into()));
    query.add_select(None, SelectField::Column("users.*".into()));
}

/// Wrap an audience query in a recipient count.
///
/// Grouped queries are counted from a subquery so the grouping still
/// applies.
pub fn count_query(mut query: SelectQuery) -> SelectQuery {
    if query.group_by.is_empty() {
        query.select.clear();
        query.add_select(
            Some("count"),
            SelectField::Expression("COUNT(DISTINCT(users.user_id))".into()),
        );
        return query;
    }

    query.add_select(Some("user_id"), SelectField::Column("users.user_id".into()));
    let mut outer = SelectQuery::from_subquery(query, "subtable");
    outer.add_select(
        Some("count"),
        SelectField::Expression("COUNT(DISTINCT(user_id))".into()),
    );
    outer
}

/// Every mailing list, by ID.
pub async fn get_all_lists(pool: &DbPool) -> Result<Vec<MessageList>, AppError> {
    Ok(sqlx::query_as::<_, MessageList>(
        "SELECT message_list_id, name FROM message_list ORDER BY message_list_id",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn validate_list_id(pool: &DbPool, list_id: i64) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM message_list WHERE message_list_id = $1)",
    )
    .bind(list_id)
    .fetch_one(pool)
    .await?)
}

/// The list used for opt-ins that do not name one. Created on first use.
pub async fn get_default_list_id(pool: &DbPool) -> Result<i64, AppError> {
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT message_list_id FROM message_list WHERE name = 'Default' ORDER BY message_list_id LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    if let Some(list_id) = existing {
        return Ok(list_id);
    }

    let list_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO message_list (name) VALUES ('Default') RETURNING message_list_id",
    )
    .fetch_one(pool)
    .await?;
    tracing::info!(list_id, "Created default mailing list");
    Ok(list_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> MessageSettings {
        MessageSettings {
            site_name: "Lightning".into(),
            web_root: "https://example.com".into(),
            tracker_key: "key".into(),
            default_name: "friend".into(),
        }
    }

    fn stored(body: &str, template: &str) -> Message {
        Message::from_parts(
            MessageRecord {
                message_id: 15,
                template_id: 1,
                subject: "News for {FIRST_NAME}".into(),
                body: body.into(),
                never_resend: false,
            },
            MessageTemplate {
                template_id: 1,
                subject: "Template subject".into(),
                body: template.into(),
            },
            settings(),
            true,
            false,
        )
    }

    fn user() -> User {
        User {
            user_id: 7,
            email: "ada@example.com".into(),
            first: "Ada".into(),
            last: "Lovelace".into(),
            salt: "salt".into(),
            created: 0,
        }
    }

    fn criteria(where_fragment: &str, field_values: &str) -> Criteria {
        Criteria {
            message_criteria_id: 1,
            where_fragment: Some(where_fragment.into()),
            field_values: Some(field_values.into()),
            ..Criteria::default()
        }
    }

    #[test]
    fn combine_appends_missing_required_tags() {
        assert_eq!(
            combine_template("<div>{CONTENT_BODY}</div>", "Hi"),
            "<div>Hi{UNSUBSCRIBE}{TRACKING_IMAGE}</div>"
        );
        assert_eq!(
            combine_template("<div>{CONTENT_BODY}</div>{UNSUBSCRIBE}", "Hi"),
            "<div>Hi{TRACKING_IMAGE}</div>{UNSUBSCRIBE}"
        );
        assert_eq!(combine_template("no slot", "Hi"), "Hi");
    }

    #[test]
    fn template_variables_are_extracted_and_stripped() {
        let mut body = "{Color=red}<p style=\"color:{COLOR}\">{greeting=Hello} there</p>".to_string();
        let vars = extract_template_variables(&mut body);
        assert_eq!(vars.get("Color").map(String::as_str), Some("red"));
        assert_eq!(vars.get("greeting").map(String::as_str), Some("Hello"));
        assert_eq!(body, "<p style=\"color:{COLOR}\"> there</p>");
    }

    #[test]
    fn renders_stored_message_for_user() {
        let mut message = stored("Hello {FIRST_NAME} ({EMAIL})", "{CONTENT_BODY}");
        message.set_user(user());
        message.apply_default_vars("<img>".into(), None);

        assert_eq!(message.subject(), "News for Ada");
        let body = message.body();
        assert!(body.starts_with("Hello Ada (ada@example.com)"));
        assert!(body.contains("/user?action=unsubscribe&u=7."));
        assert!(body.ends_with("<img>"));
    }

    #[test]
    fn unsubscribe_flag_controls_the_link() {
        let mut message = Message::from_parts(
            MessageRecord {
                message_id: 15,
                template_id: 1,
                subject: "News".into(),
                body: "Hi{UNSUBSCRIBE}".into(),
                never_resend: false,
            },
            MessageTemplate {
                template_id: 1,
                subject: String::new(),
                body: "{CONTENT_BODY}".into(),
            },
            settings(),
            false,
            false,
        );
        message.set_user(user());
        message.apply_default_vars(String::new(), None);

        assert_eq!(message.body(), "Hi");
    }

    #[test]
    fn names_fall_back_to_the_default_name() {
        let mut message = stored("{FULL_NAME}/{FIRST_NAME}/{LAST_NAME}", "{CONTENT_BODY}");
        message.set_user(User {
            first: String::new(),
            ..user()
        });
        message.apply_default_vars(String::new(), None);
        assert!(message.body().starts_with("friend/friend/Lovelace"));

        message.set_user(user());
        message.apply_default_vars(String::new(), None);
        assert!(message.body().starts_with("Ada Lovelace/Ada/Lovelace"));
    }

    #[test]
    fn custom_variables_win_and_test_prefixes_subject() {
        let mut message = stored("{COLOR=blue}Color: {COLOR}", "{CONTENT_BODY}");
        message.set_user(User {
            first: String::new(),
            ..user()
        });
        message.apply_default_vars(String::new(), None);
        message.set_test(true);

        assert_eq!(message.subject(), "TEST News for friend");
        assert!(message.body().starts_with("Color: blue"));

        message.set_custom_variable("COLOR", "green");
        assert!(message.body().starts_with("Color: green"));
        message.reset_custom_variables();
        assert!(message.body().starts_with("Color: blue"));
    }

    #[test]
    fn custom_messages_have_no_tracking_and_take_extra_vars() {
        let mut message = Message::from_parts(
            MessageRecord {
                subject: String::new(),
                body: "From {NAME}".into(),
                ..MessageRecord::default()
            },
            MessageTemplate::fallback("Lightning"),
            settings(),
            false,
            false,
        );
        let mut extra = Variables::new();
        extra.insert("NAME".into(), "Grace".into());
        message.apply_default_vars("ignored".into(), Some(extra));

        assert_eq!(message.subject(), "A message from Lightning");
        assert_eq!(message.body(), "From Grace");
    }

    #[test]
    fn users_query_requires_lists() {
        let error = build_users_query(&[], &[], None, Utc::now()).unwrap_err();
        assert!(matches!(error, AppError::NoMailingLists));
    }

    #[test]
    fn users_query_skips_previous_recipients() {
        let mut query = build_users_query(&[1, 2], &[], Some((3, 15)), Utc::now()).unwrap();
        select_users(&mut query);
        let (sql, binds) = query.render();

        assert_eq!(
            sql,
            "SELECT DISTINCT \"users\".\"user_id\" AS \"uid\", \"users\".* FROM \"message_list_user\" \
             JOIN \"users\" ON \"users\".\"user_id\" = \"message_list_user\".\"user_id\" \
             LEFT JOIN \"tracker_event\" ON \"tracker_event\".\"user_id\" = \"users\".\"user_id\" \
             AND \"tracker_event\".\"tracker_id\" = $1 AND \"tracker_event\".\"sub_id\" = $2 \
             WHERE (\"message_list_user\".\"message_list_id\" IN ($3, $4)) \
             AND (\"tracker_event\".\"user_id\" IS NULL)"
        );
        assert_eq!(binds.len(), 4);
    }

    #[test]
    fn criteria_variables_expand_into_conditions() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let items = [criteria(
            r#"{"users.created": [">", "{TODAY}"], "users.user_id": ["IN", "{IDS}"]}"#,
            r#"{"IDS": "4, 5"}"#,
        )];
        let query = build_users_query(&[1], &items, None, now).unwrap();
        let (sql, binds) = query.render();

        assert!(sql.contains("(\"users\".\"created\" > $2 AND \"users\".\"user_id\" IN ($3, $4))"));
        assert_eq!(binds[1], crate::query::BindValue::Int(19724));
        assert_eq!(binds[2], crate::query::BindValue::Int(4));
    }

    #[test]
    fn bare_join_table_links_on_user_id() {
        let items = [Criteria {
            join_fragment: Some("orders".into()),
            ..Criteria::default()
        }];
        let (sql, _) = build_users_query(&[1], &items, None, Utc::now())
            .unwrap()
            .render();
        assert!(sql.contains("LEFT JOIN \"orders\" ON \"orders\".\"user_id\" = \"users\".\"user_id\""));
    }

    #[test]
    fn join_lists_accept_positional_joins() {
        let items = [Criteria {
            join_fragment: Some(
                r#"[["JOIN", "orders", "ON orders.user_id = users.user_id"],
                    ["LEFT JOIN", "refunds", "ON refunds.order_id = orders.order_id"]]"#
                    .into(),
            ),
            ..Criteria::default()
        }];
        let query = build_users_query(&[1], &items, None, Utc::now()).unwrap();
        assert_eq!(query.joins.len(), 3);

        let (sql, _) = query.render();
        assert!(sql.contains("JOIN \"orders\" ON orders.user_id = users.user_id"));
        assert!(sql.contains("LEFT JOIN \"refunds\" ON refunds.order_id = orders.order_id"));
    }

    #[test]
    fn where_lists_are_and_groups() {
        let items = [criteria(r#"[{"users.first": "Ada"}, "users.last IS NOT NULL"]"#, "{}")];
        let (sql, binds) = build_users_query(&[1], &items, None, Utc::now())
            .unwrap()
            .render();

        assert!(sql.contains("((\"users\".\"first\" = $2) AND (users.last IS NOT NULL))"));
        assert_eq!(binds[1], crate::query::BindValue::Text("Ada".into()));
    }

    #[test]
    fn grouped_counts_use_a_subquery() {
        let items = [Criteria {
            select_fragment: Some(r#"{"total": {"expression": "SUM(orders.amount)"}}"#.into()),
            group_by_fragment: Some(r#"["users.user_id"]"#.into()),
            having_fragment: Some("SUM(orders.amount) > 100".into()),
            ..Criteria::default()
        }];
        let query = build_users_query(&[1], &items, None, Utc::now()).unwrap();
        let (sql, _) = count_query(query).render();

        assert!(sql.starts_with("SELECT COUNT(DISTINCT(user_id)) AS \"count\" FROM (SELECT SUM(orders.amount) AS \"total\", \"users\".\"user_id\" AS \"user_id\""));
        assert!(sql.contains("GROUP BY \"users\".\"user_id\" HAVING (SUM(orders.amount) > 100)) AS \"subtable\""));
    }

    #[test]
    fn plain_counts_replace_the_selection() {
        let query = build_users_query(&[1], &[], None, Utc::now()).unwrap();
        let (sql, _) = count_query(query).render();
        assert!(sql.starts_with("SELECT COUNT(DISTINCT(users.user_id)) AS \"count\" FROM \"message_list_user\""));
    }
}
