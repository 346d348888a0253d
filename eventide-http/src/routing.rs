//! Route templates for the API surface.
//!
//! Major parameters are the path parameters whose values partition the rate
//! limit space: channel, guild, and webhook identifiers. Everything else
//! shares a bucket across its values.
//!
//! Endpoint wrappers compile these templates into [`CompiledRoute`]s; the
//! few routes the API serves without rate limit headers are declared as
//! such so the client skips bucket acquisition for them.
//!
//! [`CompiledRoute`]: eventide_http_ratelimiting::CompiledRoute

use eventide_http_ratelimiting::RouteTemplate;

// Channels

pub static CHANNEL: RouteTemplate = RouteTemplate::new("/channels/{channel_id}", &["channel_id"]);
pub static CHANNEL_INVITES: RouteTemplate =
    RouteTemplate::new("/channels/{channel_id}/invites", &["channel_id"]);
pub static CHANNEL_MESSAGE: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/messages/{message_id}",
    &["channel_id"],
);
pub static CHANNEL_MESSAGES: RouteTemplate =
    RouteTemplate::new("/channels/{channel_id}/messages", &["channel_id"]);
pub static CHANNEL_MESSAGES_BULK_DELETE: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/messages/bulk-delete",
    &["channel_id"],
);
pub static CHANNEL_PERMISSIONS: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/permissions/{overwrite_id}",
    &["channel_id"],
);
pub static CHANNEL_PIN: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/pins/{message_id}",
    &["channel_id"],
);
pub static CHANNEL_PINS: RouteTemplate =
    RouteTemplate::new("/channels/{channel_id}/pins", &["channel_id"]);
pub static CHANNEL_TYPING: RouteTemplate =
    RouteTemplate::new("/channels/{channel_id}/typing", &["channel_id"]);
pub static CHANNEL_WEBHOOKS: RouteTemplate =
    RouteTemplate::new("/channels/{channel_id}/webhooks", &["channel_id"]);

// Reactions

pub static ALL_REACTIONS: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/messages/{message_id}/reactions",
    &["channel_id"],
);
pub static REACTION: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/{user_id}",
    &["channel_id"],
);
pub static OWN_REACTION: RouteTemplate = RouteTemplate::new(
    "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me",
    &["channel_id"],
);

// Guilds

pub static GUILD: RouteTemplate = RouteTemplate::new("/guilds/{guild_id}", &["guild_id"]);
pub static GUILDS: RouteTemplate = RouteTemplate::new("/guilds", &[]);
pub static GUILD_AUDIT_LOGS: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/audit-logs", &["guild_id"]);
pub static GUILD_BAN: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/bans/{user_id}", &["guild_id"]);
pub static GUILD_BANS: RouteTemplate = RouteTemplate::new("/guilds/{guild_id}/bans", &["guild_id"]);
pub static GUILD_CHANNELS: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/channels", &["guild_id"]);
pub static GUILD_EMOJI: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/emojis/{emoji_id}", &["guild_id"]);
pub static GUILD_EMOJIS: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/emojis", &["guild_id"]);
pub static GUILD_INVITES: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/invites", &["guild_id"]);
pub static GUILD_MEMBER: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/members/{user_id}", &["guild_id"]);
pub static GUILD_MEMBERS: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/members", &["guild_id"]);
pub static GUILD_MEMBER_ROLE: RouteTemplate = RouteTemplate::new(
    "/guilds/{guild_id}/members/{user_id}/roles/{role_id}",
    &["guild_id"],
);
pub static GUILD_PRUNE: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/prune", &["guild_id"]);
pub static GUILD_ROLE: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/roles/{role_id}", &["guild_id"]);
pub static GUILD_ROLES: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/roles", &["guild_id"]);
pub static GUILD_WEBHOOKS: RouteTemplate =
    RouteTemplate::new("/guilds/{guild_id}/webhooks", &["guild_id"]);

// Invites

pub static INVITE: RouteTemplate = RouteTemplate::new("/invites/{invite_code}", &[]);

// Users

pub static LEAVE_GUILD: RouteTemplate = RouteTemplate::new("/users/@me/guilds/{guild_id}", &[]);
pub static OWN_DMS: RouteTemplate = RouteTemplate::new("/users/@me/channels", &[]);
pub static OWN_GUILDS: RouteTemplate = RouteTemplate::new("/users/@me/guilds", &[]);
pub static OWN_USER: RouteTemplate = RouteTemplate::new("/users/@me", &[]);
pub static USER: RouteTemplate = RouteTemplate::new("/users/{user_id}", &[]);

// Voice

pub static VOICE_REGIONS: RouteTemplate = RouteTemplate::new("/voice/regions", &[]);

// Webhooks

pub static WEBHOOK: RouteTemplate = RouteTemplate::new("/webhooks/{webhook_id}", &["webhook_id"]);
pub static WEBHOOK_WITH_TOKEN: RouteTemplate = RouteTemplate::new(
    "/webhooks/{webhook_id}/{webhook_token}",
    &["webhook_id"],
);

// OAuth2
//
// The token endpoints respond without rate limit headers; they only pass
// through the global limiter.

pub static OAUTH2_TOKEN: RouteTemplate = RouteTemplate::without_ratelimits("/oauth2/token", &[]);
pub static OAUTH2_TOKEN_REVOKE: RouteTemplate =
    RouteTemplate::without_ratelimits("/oauth2/token/revoke", &[]);

// Gateway

pub static GATEWAY: RouteTemplate = RouteTemplate::new("/gateway", &[]);
pub static GATEWAY_BOT: RouteTemplate = RouteTemplate::new("/gateway/bot", &[]);
