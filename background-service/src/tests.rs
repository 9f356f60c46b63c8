#[cfg(test)]
mod tests {
    use crate::{comment_link_pattern, BackgroundService, Command, CycleOutcome};
    use delta_engine::testing::{comment, sample_config, MockPlatform, BOT_NAME, SUBMISSION_ID};
    use delta_engine::{CycleTracker, MessageTemplates, SIDEBAR_PAGE};
    use deltabot_core::{InboxItem, Message, MessageKey};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const LONG_TAIL: &str = "that argument about incentives really did change how I see this.";
    const MODERATOR: &str = "mod_carol";

    fn delta_body() -> String {
        format!("!delta {}", LONG_TAIL)
    }

    fn link(id: &str) -> String {
        format!(
            "https://www.reddit.com/r/changemyview/comments/s1/cmv_testing/{}",
            id
        )
    }

    fn message(id: &str, author: &str, subject: &str, body: &str) -> InboxItem {
        InboxItem::DirectMessage(Message {
            id: id.to_string(),
            author: Some(author.to_string()),
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }

    struct Harness {
        _dir: TempDir,
        cursor: PathBuf,
        service: BackgroundService<MockPlatform>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_tracker(|_| {})
        }

        fn with_tracker(seed: impl FnOnce(&mut CycleTracker)) -> Self {
            let dir = TempDir::new().unwrap();
            let cursor = dir.path().join("last_comment.txt");
            let mut tracker = CycleTracker::new(&cursor);
            seed(&mut tracker);
            let platform = MockPlatform::new(BOT_NAME);
            platform.add_moderator(MODERATOR);
            let service =
                BackgroundService::new(platform, sample_config(&cursor), tracker).unwrap();
            Self {
                _dir: dir,
                cursor,
                service,
            }
        }

        fn platform(&self) -> &MockPlatform {
            self.service.platform()
        }

        /// alice writes a top-level comment that bob answers with `body`.
        fn thread(&self, body: &str) {
            self.platform()
                .add_comment(comment("c1", SUBMISSION_ID, Some("alice"), "Consider this view."));
            self.platform()
                .add_comment(comment("c2", "t1_c1", Some("bob"), body));
        }

        fn cursor(&self) -> Option<String> {
            std::fs::read_to_string(&self.cursor).ok()
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("add"), Some(Command::Add));
        assert_eq!(Command::parse("Force Add"), Some(Command::ForceAdd));
        assert_eq!(Command::parse(" STOP "), Some(Command::Stop));
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn test_comment_links() {
        let pattern = comment_link_pattern("changemyview").unwrap();
        let body = format!(
            "{}\nand http://reddit.com/r/changemyview/comments/s1/cmv_testing/c9/?context=3\n\
             but not https://www.reddit.com/r/other/comments/s1/title/c7",
            link("c2")
        );
        let ids: Vec<&str> = pattern
            .captures_iter(&body)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(ids, vec!["c2", "c9"]);
    }

    #[tokio::test]
    async fn test_stream_award_posts_distinguished_confirmation() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_comment(comment("c1", SUBMISSION_ID, Some("alice"), "Consider this view."));
        harness
            .platform()
            .add_stream_comment(comment("c2", "t1_c1", Some("bob"), &delta_body()));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 1 });

        let replies = harness.platform().replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].parent, "t1_c2");
        assert!(replies[0].text.contains("/u/alice"));
        assert_eq!(harness.platform().distinguished(), vec![replies[0].handle.clone()]);
        assert_eq!(harness.platform().points("alice").unwrap().count, 1);

        let sidebar = harness.platform().page(SIDEBAR_PAGE).unwrap();
        assert!(sidebar.contains("Top Ten Viewchangers"));
        assert_eq!(harness.cursor().as_deref(), Some("t1_c2"));
    }

    #[tokio::test]
    async fn test_processed_comments_are_not_rescanned() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_comment(comment("c1", SUBMISSION_ID, Some("alice"), "Consider this view."));
        harness
            .platform()
            .add_stream_comment(comment("c2", "t1_c1", Some("bob"), &delta_body()));

        harness.service.run_cycle().await;
        let outcome = harness.service.run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Continue { awards: 0 });
        assert_eq!(harness.platform().replies().len(), 1);
        assert!(harness.service.tracker().has_seen("t1_c2"));
    }

    #[tokio::test]
    async fn test_comments_before_the_window_are_skipped() {
        let mut harness = Harness::with_tracker(|tracker| tracker.record("t1_c5"));
        harness
            .platform()
            .add_comment(comment("c1", SUBMISSION_ID, Some("alice"), "Consider this view."));
        harness
            .platform()
            .add_stream_comment(comment("c2", "t1_c1", Some("bob"), &delta_body()));

        harness.service.run_cycle().await;
        assert!(harness.platform().replies().is_empty());
        assert_eq!(harness.service.tracker().latest().as_deref(), Some("t1_c5"));
    }

    #[tokio::test]
    async fn test_missing_parent_is_skipped() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_stream_comment(comment("d1", "t1_gone", Some("bob"), &delta_body()));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 0 });
        assert!(harness.platform().replies().is_empty());
        assert_eq!(harness.cursor().as_deref(), Some("t1_d1"));
    }

    #[tokio::test]
    async fn test_missing_grandparent_skips_only_that_comment() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_comment(comment("d0", "t1_gone", Some("alice"), "Orphaned reply."));
        harness
            .platform()
            .add_stream_comment(comment("d1", "t1_d0", Some("bob"), &delta_body()));
        harness
            .platform()
            .add_comment(comment("e1", SUBMISSION_ID, Some("alice"), "Consider this view."));
        harness
            .platform()
            .add_stream_comment(comment("e2", "t1_e1", Some("bob"), &delta_body()));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 1 });

        let replies = harness.platform().replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].parent, "t1_e2");
        assert!(harness.service.tracker().has_seen("t1_d1"));
        assert_eq!(harness.cursor().as_deref(), Some("t1_e2"));
    }

    #[tokio::test]
    async fn test_own_comments_are_not_scanned() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_comment(comment("c1", SUBMISSION_ID, Some("alice"), "Consider this view."));
        harness.platform().add_stream_comment(comment(
            "c2",
            "t1_c1",
            Some(BOT_NAME),
            &format!("Use !delta when {}", LONG_TAIL),
        ));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 0 });
        assert!(harness.platform().replies().is_empty());
        assert_eq!(harness.platform().fetch_count(), 0);
        assert!(harness.service.tracker().has_seen("t1_c2"));
        assert_eq!(harness.cursor().as_deref(), Some("t1_c2"));
    }

    #[tokio::test]
    async fn test_top_level_comment_is_skipped() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_stream_comment(comment("d1", SUBMISSION_ID, Some("bob"), &delta_body()));

        harness.service.run_cycle().await;
        assert!(harness.platform().replies().is_empty());
        assert!(harness.platform().page(SIDEBAR_PAGE).is_none());
    }

    #[tokio::test]
    async fn test_failed_cycle_keeps_running() {
        let mut harness = Harness::new();
        harness
            .platform()
            .add_comment(comment("c1", SUBMISSION_ID, Some("alice"), "Consider this view."));
        harness
            .platform()
            .add_stream_comment(comment("c2", "t1_c1", Some("bob"), &delta_body()));
        harness.platform().fail_page("scoreboard_2024_2");

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 0 });
        let outcome = harness.service.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Continue { .. }));
    }

    #[tokio::test]
    async fn test_add_command_from_moderator() {
        let mut harness = Harness::new();
        harness.thread(&delta_body());
        harness
            .platform()
            .push_unread(message("m1", MODERATOR, "add", &link("c2")));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 1 });
        assert_eq!(harness.platform().replies().len(), 1);

        let sent = harness.platform().direct_messages();
        let last = sent.last().unwrap();
        assert_eq!(last.recipient, MODERATOR);
        assert_eq!(last.subject, "Add complete");
        assert_eq!(harness.platform().read_items(), vec!["t4_m1".to_string()]);
    }

    #[tokio::test]
    async fn test_commands_from_non_moderators_are_ignored() {
        let mut harness = Harness::new();
        harness.thread(&delta_body());
        harness
            .platform()
            .push_unread(message("m1", "mallory", "add", &link("c2")));

        harness.service.run_cycle().await;
        assert!(harness.platform().replies().is_empty());
        assert!(harness.platform().direct_messages().is_empty());
        assert_eq!(harness.platform().read_items(), vec!["t4_m1".to_string()]);
    }

    #[tokio::test]
    async fn test_force_add_notifies_mod_mail_and_skips_checks() {
        let mut harness = Harness::new();
        harness.thread("Thanks.");
        harness
            .platform()
            .push_unread(message("m1", MODERATOR, "Force Add", &link("c2")));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 1 });

        let sent = harness.platform().direct_messages();
        assert_eq!(sent[0].recipient, "/r/changemyview");
        assert_eq!(sent[0].subject, "Force Add Detected");
        assert!(sent[0].body.contains(&link("c2")));
        assert_eq!(sent.last().unwrap().subject, "Add complete");
        assert_eq!(harness.platform().points("alice").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_stop_command_ends_the_loop() {
        let mut harness = Harness::new();
        harness.thread(&delta_body());
        harness
            .platform()
            .push_unread(message("m1", MODERATOR, "stop", ""));
        harness
            .platform()
            .add_stream_comment(comment("c3", "t1_c1", Some("dave"), &delta_body()));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Stop);

        let sent = harness.platform().direct_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Stop Message Confirmed");
        assert_eq!(harness.platform().read_items(), vec!["t4_m1".to_string()]);
        assert!(harness.platform().replies().is_empty());
        assert_eq!(harness.cursor(), None);
    }

    #[tokio::test]
    async fn test_reset_command_clears_the_window() {
        let mut harness = Harness::with_tracker(|tracker| tracker.record("t1_c5"));
        harness
            .platform()
            .push_unread(message("m1", MODERATOR, "reset", ""));

        harness.service.run_cycle().await;
        assert!(harness.service.tracker().window().is_empty());
    }

    /// bob's delta was first rejected as too short, and bob has since
    /// expanded it.
    fn rejected_thread(harness: &Harness) {
        harness.thread(&delta_body());
        let templates = MessageTemplates::new(sample_config("unused").messages);
        let rejection = templates.renderings(MessageKey::TooLittleText, &["alice"]);
        harness
            .platform()
            .add_comment(comment("b1", "t1_c2", Some(BOT_NAME), &rejection[0]));
    }

    #[tokio::test]
    async fn test_reply_from_original_commenter_upgrades_rejection() {
        let mut harness = Harness::new();
        rejected_thread(&harness);
        let nudge = comment("c3", "t1_b1", Some("bob"), "I expanded my comment, please recheck.");
        harness.platform().add_comment(nudge.clone());
        harness.platform().push_unread(InboxItem::CommentReply(nudge));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 1 });

        let edits = harness.platform().edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0.fullname, "t1_b1");
        assert!(edits[0].1.contains("/u/alice"));
        assert_eq!(harness.platform().points("alice").unwrap().count, 1);
        assert_eq!(harness.platform().read_items(), vec!["t1_c3".to_string()]);
    }

    #[tokio::test]
    async fn test_reply_from_bystander_does_not_rescan() {
        let mut harness = Harness::new();
        rejected_thread(&harness);
        let nudge = comment("c3", "t1_b1", Some("eve"), "Please give bob the delta.");
        harness.platform().add_comment(nudge.clone());
        harness.platform().push_unread(InboxItem::CommentReply(nudge));

        harness.service.run_cycle().await;
        assert!(harness.platform().edits().is_empty());
        assert_eq!(harness.platform().points("alice"), None);
    }

    #[tokio::test]
    async fn test_rescan_command() {
        let mut harness = Harness::new();
        rejected_thread(&harness);
        harness
            .platform()
            .push_unread(message("m1", MODERATOR, "rescan", &link("b1")));

        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 1 });
        assert_eq!(harness.platform().edits().len(), 1);
        assert_eq!(harness.platform().distinguished().len(), 1);

        // A second rescan finds a confirmation, not a rejection.
        harness
            .platform()
            .push_unread(message("m2", MODERATOR, "rescan", &link("b1")));
        let outcome = harness.service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Continue { awards: 0 });
    }
}
