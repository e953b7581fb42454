//! Skill catalog

use super::SkillMeta;

pub(super) const SKILLS: &[SkillMeta] = &[
    SkillMeta {
        id: "daily-briefing",
        name: "Daily Briefing",
        description: "Morning news briefing",
        cron: Some("0 13 * * *"),
        required_plugins: &[],
    },
    SkillMeta {
        id: "content-engine",
        name: "Content Engine",
        description: "Weekly content calendar generation from trending topics",
        cron: Some("0 1 * * 1"),
        required_plugins: &["convex-knowledge"],
    },
    SkillMeta {
        id: "daily-posts",
        name: "Daily Posts",
        description: "Draft daily social media posts from the content calendar",
        cron: Some("0 13 * * *"),
        required_plugins: &["postiz", "convex-knowledge"],
    },
    SkillMeta {
        id: "newsletter-writer",
        name: "Newsletter Writer",
        description: "Weekly newsletter draft from content calendar and engagement data",
        cron: Some("0 14 * * 2"),
        required_plugins: &["beehiiv", "convex-knowledge"],
    },
    SkillMeta {
        id: "engagement-monitor",
        name: "Engagement Monitor",
        description: "Weekly social media analytics",
        cron: Some("0 18 * * 5"),
        required_plugins: &["postiz", "convex-knowledge"],
    },
    SkillMeta {
        id: "job-hunter",
        name: "Job Hunter",
        description: "On-demand job search, company research and outreach drafting",
        cron: None,
        required_plugins: &[],
    },
    SkillMeta {
        id: "dynoclux",
        name: "DynoClux Privacy Enforcement",
        description: "Inbox scanning and compliance notices",
        cron: None,
        required_plugins: &["dynoclux"],
    },
    SkillMeta {
        id: "dynosist",
        name: "DynoSist Email Assistant",
        description: "Compose mail drafts with attachments",
        cron: None,
        required_plugins: &["dynosist"],
    },
];
