// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn serde_tags_variants() {
    let ev = Event::dilution("latest OD=0.60V >= target OD=0.50V");
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], "dilution");
    assert_eq!(json["reason"], "latest OD=0.60V >= target OD=0.50V");
}

#[test]
fn alt_media_volumes_survive_roundtrip() {
    let ev = Event::AltMedia {
        reason: "PID output=0.30".into(),
        media_ml: Some(4.9),
        alt_media_ml: Some(2.1),
    };
    let json = serde_json::to_string(&ev).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ev);
}

#[test]
fn alt_media_omits_absent_volumes() {
    let json = serde_json::to_value(Event::alt_media("x")).unwrap();
    assert!(json.get("media_ml").is_none());
    assert!(json.get("alt_media_ml").is_none());
}

#[test]
fn display_includes_reason() {
    assert_eq!(Event::no_event("Paused.").to_string(), "no event: Paused.");
    assert!(Event::dilution("diluting").to_string().starts_with("dilution event:"));
}
