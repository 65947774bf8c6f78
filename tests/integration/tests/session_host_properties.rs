#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_orchestrator::Orchestrator;
use relay_provider::{
    AsyncBridge, AsyncToolSessionProvider, ErrorClass, ProviderConfig, ProviderSelection,
    StdioSessionTransport, StdioTransportConfig,
};
use relay_session::ProviderKind;
use relay_tools::ToolDispatcher;
use tempfile::tempdir;

// Answers every prompt except the very first one it receives.
const STALL_FIRST_SEND_HOST: &str = r##"
field() { printf '%s' "$1" | sed -n "s/.*\"$2\":\"\([^\"]*\)\".*/\1/p"; }
number() { printf '%s' "$1" | sed -n "s/.*\"$2\":\([0-9]*\).*/\1/p"; }
sends=0
while IFS= read -r line; do
  case "$line" in
    *'"op":"create_session"'*)
      rid=$(field "$line" request_id)
      printf '{"type":"session.created","request_id":"%s","session_id":"s-%s"}\n' "$rid" "$rid"
      ;;
    *'"op":"send"'*)
      sends=$((sends + 1))
      if [ "$sends" -eq 1 ]; then
        continue
      fi
      sid=$(field "$line" session_id)
      tid=$(number "$line" turn_id)
      prompt=$(field "$line" prompt)
      printf '{"type":"assistant.message","session_id":"%s","turn_id":%s,"content":"host: %s"}\n' "$sid" "$tid" "$prompt"
      printf '{"type":"session.idle","session_id":"%s","turn_id":%s}\n' "$sid" "$tid"
      ;;
  esac
done
"##;

fn write_host(dir: &Path) -> PathBuf {
    let script = dir.join("stall-host.sh");
    std::fs::write(&script, format!("#!/bin/sh\nset -eu\n{STALL_FIRST_SEND_HOST}")).expect("write script");
    let mut perms = std::fs::metadata(&script)
        .expect("script metadata")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).expect("chmod script");
    script
}

#[test]
fn integration_stalled_turn_times_out_without_poisoning_other_chats() {
    let dir = tempdir().expect("tempdir");
    let host = write_host(dir.path());
    let bridge = Arc::new(AsyncBridge::new(2));
    let transport = StdioSessionTransport::new(
        StdioTransportConfig {
            command: host.display().to_string(),
            args: Vec::new(),
        },
        Arc::clone(&bridge),
    );
    let provider = AsyncToolSessionProvider::new(Arc::new(transport), bridge, None, 500);
    let orchestrator =
        Orchestrator::with_provider(Box::new(provider), ToolDispatcher::default(), 20);

    let started = Instant::now();
    let stalled = orchestrator.handle_detailed("a", "first", None);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stalled.failure, Some(ErrorClass::Timeout));
    assert!(stalled.text.starts_with("[timeout]"), "{}", stalled.text);
    assert!(orchestrator.history("a").is_empty());

    assert_eq!(orchestrator.handle("b", "other", None), "host: other");
    assert_eq!(orchestrator.handle("a", "second", None), "host: second");
    assert_eq!(orchestrator.history("a").len(), 2);
    assert_eq!(orchestrator.provider_kind(), ProviderKind::AsyncToolSession);

    assert!(orchestrator.clear_session("a"));
    orchestrator.shutdown();
    assert_eq!(orchestrator.active_sessions(), 0);
}

#[test]
fn integration_missing_session_command_falls_back() {
    let orchestrator = Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::AsyncToolSession {
            command: None,
            args: Vec::new(),
            model: None,
        },
        ..ProviderConfig::default()
    });
    let outcome = orchestrator.handle_detailed("chat", "10 km to miles", None);
    assert!(outcome.text.contains("6.21"));
    assert_eq!(outcome.answered_by, ProviderKind::RuleBased);
    assert_eq!(outcome.failure, Some(ErrorClass::ProviderUnavailable));
}
