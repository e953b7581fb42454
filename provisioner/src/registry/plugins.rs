//! Plugin catalog

use super::{PluginMeta, SecretKey};

const fn key(config_key: &'static str, secret_name: &'static str) -> SecretKey {
    SecretKey {
        config_key,
        secret_name,
    }
}

const MEDIA_OPTIONAL: &[SecretKey] = &[
    key("openaiApiKey", "openai-api-key"),
    key("convexUrl", "convex-url"),
    key("driveFolderId", "drive-media-folder-id"),
    key("driveClientId", "drive-oauth-client-id"),
    key("driveClientSecret", "drive-oauth-client-secret"),
    key("driveRefreshToken", "drive-oauth-refresh-token"),
];

const GMAIL_KEYS: &[SecretKey] = &[
    key("gmailClientId", "drive-oauth-client-id"),
    key("gmailClientSecret", "drive-oauth-client-secret"),
    key("gmailRefreshToken", "gmail-oauth-refresh-token"),
];

pub(super) const PLUGINS: &[PluginMeta] = &[
    PluginMeta {
        id: "postiz",
        name: "Postiz Social Media",
        description: "Create and schedule social media posts across platforms",
        required: &[
            key("postizUrl", "postiz-url"),
            key("postizApiKey", "postiz-api-key"),
        ],
        optional: &[],
    },
    PluginMeta {
        id: "convex-knowledge",
        name: "Convex Knowledge Base",
        description: "Store and search knowledge for content planning and insights",
        required: &[key("convexUrl", "convex-url")],
        optional: &[],
    },
    PluginMeta {
        id: "beehiiv",
        name: "Beehiiv Newsletter",
        description: "Draft and manage newsletter content via Beehiiv",
        required: &[
            key("beehiivApiKey", "beehiiv-api-key"),
            key("beehiivPublicationId", "beehiiv-publication-id"),
        ],
        optional: &[],
    },
    PluginMeta {
        id: "image-gen",
        name: "Image Generation",
        description: "Generate images with persistent storage",
        required: &[key("geminiApiKey", "google-ai-api-key")],
        optional: MEDIA_OPTIONAL,
    },
    PluginMeta {
        id: "twitter-research",
        name: "Twitter/X Research",
        description: "Research trends, search posts and monitor accounts on Twitter/X",
        required: &[key("bearerToken", "twitter-bearer-token")],
        optional: &[],
    },
    PluginMeta {
        id: "github",
        name: "GitHub",
        description: "Read code, create branches, commit files and open pull requests",
        required: &[key("githubToken", "github-token")],
        optional: &[key("defaultOwner", "github-default-owner")],
    },
    PluginMeta {
        id: "dynoclux",
        name: "DynoClux Privacy Enforcement",
        description: "Scan mail, unsubscribe from unwanted senders and track privacy deadlines",
        required: &[
            key("gmailClientId", "drive-oauth-client-id"),
            key("gmailClientSecret", "drive-oauth-client-secret"),
            key("gmailRefreshToken", "gmail-oauth-refresh-token"),
            key("convexUrl", "convex-url"),
        ],
        optional: &[],
    },
    PluginMeta {
        id: "dynosist",
        name: "DynoSist Email Assistant",
        description: "Create mail drafts with file attachments and find local files",
        required: GMAIL_KEYS,
        optional: &[],
    },
    PluginMeta {
        id: "web-tools",
        name: "Web Tools",
        description: "Crawl websites and extract text from PDF files",
        required: &[],
        optional: &[],
    },
    PluginMeta {
        id: "video-gen",
        name: "Video Generation",
        description: "Generate videos with persistent storage",
        required: &[key("geminiApiKey", "google-ai-api-key")],
        optional: MEDIA_OPTIONAL,
    },
];
