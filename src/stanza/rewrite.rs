//! Presence masking rules.

use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine};

use super::tree::{Element, Fragment};
use crate::error::RelayError;
use crate::masking::{MaskingConfig, Visibility};

const PRESENCE: &str = "presence";
const ROUTING_ATTRIBUTE: &str = "to";
const SHOW: &str = "show";
const STATUS: &str = "status";
const GAMES: &str = "games";

/// Primary game: kept for mobile, dropped for offline
const LEAGUE: &str = "league_of_legends";
const LEAGUE_STATUS: &str = "st";
const LEAGUE_MOBILE_STRIPPED: &[&str] = &["p", "m"];
const DO_NOT_DISTURB: &str = "dnd";

/// Card game presence is never forwarded
const RUNETERRA: &str = "bacon";

/// Carries the client version we capture before dropping the block
const VALORANT: &str = "valorant";
const VALORANT_PAYLOAD: &str = "p";
const VALORANT_VERSION_KEY: &str = "partyClientVersion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOptions {
    pub target: Visibility,
    pub relay_lobby_chat: bool,
}

impl RewriteOptions {
    pub fn for_config(config: &MaskingConfig) -> Self {
        Self {
            target: config.effective_target(),
            relay_lobby_chat: config.relay_lobby_chat,
        }
    }
}

/// Rewrite every presence stanza in `raw` for `options.target` and return
/// the fragment to forward. Errors mean nothing should be forwarded.
///
/// `version` is filled the first time a VALORANT payload with a version is
/// seen and left alone afterwards.
pub fn rewrite_presence(
    raw: &str,
    options: &RewriteOptions,
    version: &OnceLock<String>,
) -> Result<String, RelayError> {
    let mut fragment = Fragment::parse(raw)?;
    if !fragment.has_elements() {
        return Err(RelayError::EmptyFragment);
    }

    if !options.relay_lobby_chat {
        fragment.retain(|item| {
            !item
                .element()
                .is_some_and(|e| e.name == PRESENCE && e.attribute(ROUTING_ATTRIBUTE).is_some())
        });
    }

    for item in fragment.items_mut() {
        let is_self_presence = item
            .element()
            .is_some_and(|e| e.name == PRESENCE && e.attribute(ROUTING_ATTRIBUTE).is_none());
        if !is_self_presence {
            continue;
        }

        if let Some(presence) = item.element_mut() {
            mask_presence(presence, options.target, version);
        }
    }

    Ok(fragment.to_xml())
}

fn mask_presence(presence: &mut Element, target: Visibility, version: &OnceLock<String>) {
    let games_had_elements = presence.child(GAMES).is_some_and(Element::has_elements);
    let in_dnd = presence
        .find(&[GAMES, LEAGUE, LEAGUE_STATUS])
        .is_some_and(|st| st.text() == DO_NOT_DISTURB);

    // An in-game "do not disturb" is never downgraded to plain online.
    if target != Visibility::Chat || !in_dnd {
        if let Some(show) = presence.child_mut(SHOW) {
            show.set_text(target.as_str());
        }
        if let Some(st) = presence.find_mut(&[GAMES, LEAGUE, LEAGUE_STATUS]) {
            st.set_text(target.as_str());
        }
    }

    match target {
        Visibility::Chat => {}
        Visibility::Mobile => {
            presence.remove_child(STATUS);
            if let Some(league) = presence.find_mut(&[GAMES, LEAGUE]) {
                for field in LEAGUE_MOBILE_STRIPPED {
                    league.remove_child(field);
                }
            }
        }
        Visibility::Offline => {
            presence.remove_child(STATUS);
            if let Some(games) = presence.child_mut(GAMES) {
                games.remove_child(LEAGUE);
            }
        }
    }

    if version.get().is_none() {
        if let Some(payload) = presence.find(&[GAMES, VALORANT, VALORANT_PAYLOAD]) {
            match extract_version(&payload.text()) {
                Ok(Some(found)) => {
                    tracing::info!("Found VALORANT version: {}", found);
                    let _ = version.set(found);
                }
                Ok(None) => tracing::debug!("VALORANT presence has no version"),
                Err(e) => tracing::debug!("Failed to read VALORANT presence: {}", e),
            }
        }
    }

    if let Some(games) = presence.child_mut(GAMES) {
        games.remove_child(RUNETERRA);
        games.remove_child(VALORANT);

        // Don't leave behind a container we emptied ourselves.
        if games_had_elements && !games.has_elements() {
            presence.remove_child(GAMES);
        }
    }
}

/// Decode the base64 JSON payload and pull out the client version
pub fn extract_version(payload: &str) -> Result<Option<String>, RelayError> {
    let bytes = STANDARD.decode(payload.trim())?;
    let json = String::from_utf8(bytes)?;
    let value: serde_json::Value = serde_json::from_str(&json)?;

    Ok(value
        .get(VALORANT_VERSION_KEY)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = "<presence><show>chat</show><games><league_of_legends><st>chat</st></league_of_legends></games></presence>";

    fn opts(target: Visibility) -> RewriteOptions {
        RewriteOptions {
            target,
            relay_lobby_chat: true,
        }
    }

    fn rewrite(raw: &str, target: Visibility) -> String {
        rewrite_presence(raw, &opts(target), &OnceLock::new()).unwrap()
    }

    fn valorant_block(version: &str) -> String {
        let json = format!(r#"{{"isValid":true,"{VALORANT_VERSION_KEY}":"{version}"}}"#);
        format!("<valorant><st>chat</st><p>{}</p></valorant>", STANDARD.encode(json))
    }

    fn full_presence(valorant: &str) -> String {
        format!(
            "<presence id='p1'><show>chat</show><status>grinding ranked</status><games>\
             <league_of_legends><st>chat</st><p>party</p><m>rank</m><s.t>1</s.t></league_of_legends>\
             <bacon><st>chat</st></bacon>{valorant}</games></presence>"
        )
    }

    #[test]
    fn test_offline_example() {
        assert_eq!(
            rewrite(BASIC, Visibility::Offline),
            "<presence><show>offline</show></presence>"
        );
    }

    #[test]
    fn test_mobile_example() {
        assert_eq!(
            rewrite(BASIC, Visibility::Mobile),
            "<presence><show>mobile</show><games><league_of_legends><st>mobile</st></league_of_legends></games></presence>"
        );
    }

    #[test]
    fn test_offline_strips_everything() {
        let out = rewrite(&full_presence(&valorant_block("v1")), Visibility::Offline);
        assert_eq!(out, r#"<presence id="p1"><show>offline</show></presence>"#);
    }

    #[test]
    fn test_mobile_keeps_league_block() {
        let out = rewrite(&full_presence(&valorant_block("v1")), Visibility::Mobile);
        assert_eq!(
            out,
            r#"<presence id="p1"><show>mobile</show><games><league_of_legends><st>mobile</st><s.t>1</s.t></league_of_legends></games></presence>"#
        );
    }

    #[test]
    fn test_chat_keeps_status_and_league() {
        let raw = full_presence(&valorant_block("v1")).replace("<show>chat</show>", "<show>away</show>");
        let out = rewrite(&raw, Visibility::Chat);
        assert_eq!(
            out,
            r#"<presence id="p1"><show>chat</show><status>grinding ranked</status><games><league_of_legends><st>chat</st><p>party</p><m>rank</m><s.t>1</s.t></league_of_legends></games></presence>"#
        );
    }

    #[test]
    fn test_chat_preserves_dnd() {
        let raw = "<presence><show>dnd</show><games><league_of_legends><st>dnd</st></league_of_legends><bacon/></games></presence>";
        assert_eq!(
            rewrite(raw, Visibility::Chat),
            "<presence><show>dnd</show><games><league_of_legends><st>dnd</st></league_of_legends></games></presence>"
        );
    }

    #[test]
    fn test_masking_overrides_dnd() {
        let raw = "<presence><show>dnd</show><games><league_of_legends><st>dnd</st></league_of_legends></games></presence>";
        assert_eq!(
            rewrite(raw, Visibility::Mobile),
            "<presence><show>mobile</show><games><league_of_legends><st>mobile</st></league_of_legends></games></presence>"
        );
        assert_eq!(
            rewrite(raw, Visibility::Offline),
            "<presence><show>offline</show></presence>"
        );
    }

    #[test]
    fn test_routed_presence_dropped_without_lobby_relay() {
        let raw = "<presence to='lobby@champ-select.pvp.net/me'><show>chat</show></presence><presence><show>chat</show></presence>";
        for target in [Visibility::Chat, Visibility::Offline, Visibility::Mobile] {
            let options = RewriteOptions {
                target,
                relay_lobby_chat: false,
            };
            let out = rewrite_presence(raw, &options, &OnceLock::new()).unwrap();
            assert!(!out.contains("lobby@"), "{target}: {out}");
            assert_eq!(out, format!("<presence><show>{target}</show></presence>"));
        }
    }

    #[test]
    fn test_routed_presence_verbatim_with_lobby_relay() {
        let routed = "<presence to='lobby@champ-select.pvp.net/me' ><show>chat</show><status>hi</status><games><bacon/></games></presence>";
        for target in [Visibility::Chat, Visibility::Offline, Visibility::Mobile] {
            assert_eq!(rewrite(routed, target), routed);
        }
    }

    #[test]
    fn test_other_stanzas_pass_through() {
        let raw = "<iq type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq><presence><show>chat</show></presence>";
        assert_eq!(
            rewrite(raw, Visibility::Offline),
            "<iq type='get' id='1'><ping xmlns='urn:xmpp:ping'/></iq><presence><show>offline</show></presence>"
        );
    }

    #[test]
    fn test_games_without_league_is_kept_when_untouched() {
        let raw = "<presence><show>chat</show><games><keystone><st>chat</st></keystone></games></presence>";
        assert_eq!(
            rewrite(raw, Visibility::Offline),
            "<presence><show>offline</show><games><keystone><st>chat</st></keystone></games></presence>"
        );
    }

    #[test]
    fn test_version_captured_once() {
        let version = OnceLock::new();
        let options = opts(Visibility::Offline);

        let first = rewrite_presence(&full_presence(&valorant_block("release-01")), &options, &version).unwrap();
        assert!(!first.contains("valorant"));
        assert_eq!(version.get().map(String::as_str), Some("release-01"));

        let second = rewrite_presence(&full_presence(&valorant_block("release-02")), &options, &version).unwrap();
        assert!(!second.contains("valorant"));
        assert_eq!(version.get().map(String::as_str), Some("release-01"));
    }

    #[test]
    fn test_version_captured_under_chat() {
        let version = OnceLock::new();
        let out = rewrite_presence(&full_presence(&valorant_block("release-03")), &opts(Visibility::Chat), &version).unwrap();
        assert!(!out.contains("valorant"));
        assert!(!out.contains("bacon"));
        assert_eq!(version.get().map(String::as_str), Some("release-03"));
    }

    #[test]
    fn test_bad_version_payload_still_rewrites() {
        let version = OnceLock::new();
        let raw = "<presence><show>chat</show><games><valorant><p>not base64!</p></valorant></games></presence>";
        let out = rewrite_presence(raw, &opts(Visibility::Mobile), &version).unwrap();
        assert_eq!(out, "<presence><show>mobile</show></presence>");
        assert!(version.get().is_none());
    }

    #[test]
    fn test_extract_version() {
        let payload = STANDARD.encode(r#"{"partyClientVersion":"release-09.07"}"#);
        assert_eq!(
            extract_version(&payload).unwrap().as_deref(),
            Some("release-09.07")
        );
        assert_eq!(extract_version(&STANDARD.encode("{}")).unwrap(), None);
        assert!(matches!(
            extract_version(&STANDARD.encode("not json")),
            Err(RelayError::Json(_))
        ));
        assert!(matches!(extract_version("%%%"), Err(RelayError::Base64(_))));
    }

    #[test]
    fn test_malformed_fragment_fails() {
        let version = OnceLock::new();
        let options = opts(Visibility::Offline);
        assert!(rewrite_presence("<presence><show>chat</show>", &options, &version).is_err());
        assert!(matches!(
            rewrite_presence("just text", &options, &version),
            Err(RelayError::EmptyFragment)
        ));
    }

    #[test]
    fn test_everything_dropped_yields_empty_output() {
        let options = RewriteOptions {
            target: Visibility::Offline,
            relay_lobby_chat: false,
        };
        let out = rewrite_presence("<presence to='room@muc'/>", &options, &OnceLock::new()).unwrap();
        assert!(out.is_empty());
    }
}
