//! End-to-end checks of the synchronous pipeline: request parsing, heuristic
//! scoring, repair of backend text, consensus and the stream protocol.

use std::io::Write;

use evaluation::consensus;
use evaluation::events::{StreamEvent, StreamReader};
use evaluation::heuristic;
use evaluation::schema::validate_or_repair;
use evaluation::{
    parse_request, AnalysisResponse, PersonaConfig, PersonaOutput, PersonaSet, RuntimeOptions,
};
use serde_json::json;

fn scenario_request() -> serde_json::Value {
    json!({
        "summary": "",
        "slides_text": "Slide 1: Hello\nSlide 2: World",
        "slides_struct": [{
            "index": 1, "title": "Hello", "texts": ["Hello"],
            "wordCount": 1, "imageCount": 0, "chartCount": 0, "shapeCount": 0
        }],
        "use_llm": false
    })
}

#[test]
fn heuristic_scenario_from_raw_request() {
    let (input, opts) = parse_request(&scenario_request(), &RuntimeOptions::default()).unwrap();
    assert!(!opts.use_llm);

    let persona = PersonaConfig::new("a").with_weighting(1.0, 1.0, 1.0);
    let output = heuristic::score_persona(&input, &persona, &opts);

    assert_eq!(output.persona_id, "a");
    assert_eq!(output.evidence[0].slide, Some(1));
    assert!((output.confidence - 0.68).abs() < 1e-9);
    for v in [
        output.scores.clarity,
        output.scores.uniqueness,
        output.scores.persuasiveness,
    ] {
        assert!((30..=95).contains(&v));
    }
}

#[test]
fn backend_text_repairs_into_persona_output() {
    let (input, opts) = parse_request(&scenario_request(), &RuntimeOptions::default()).unwrap();
    let reference = heuristic::score_persona(&input, &PersonaConfig::new("a"), &opts);
    let text = serde_json::to_string(&reference).unwrap();

    let direct: PersonaOutput = validate_or_repair(text.as_str()).unwrap();
    assert_eq!(direct, reference);

    let noisy = format!("Here is my review:\n```json\n{text}\n```\nThanks!");
    let repaired: PersonaOutput = validate_or_repair(noisy.as_str()).unwrap();
    assert_eq!(repaired, reference);

    assert!(validate_or_repair::<PersonaOutput>("I cannot help with that.").is_none());
}

#[test]
fn builtin_panel_streams_and_rebuilds() {
    let panel = PersonaSet::builtin().unwrap();
    let (input, opts) = parse_request(&scenario_request(), &RuntimeOptions::default()).unwrap();

    let personas: Vec<PersonaOutput> = panel
        .as_slice()
        .iter()
        .map(|p| heuristic::score_persona(&input, p, &opts))
        .collect();
    let consensus = consensus::build(&personas);
    assert!(consensus.top_todos.len() <= 3);
    assert!(consensus.what_if.iter().all(|w| (2..=12).contains(&w.expected_gain)));

    let expected = AnalysisResponse::new(personas.clone(), consensus.clone());

    let mut wire = String::new();
    for p in personas.iter().rev() {
        wire.push_str(&StreamEvent::persona(p.clone()).to_frame().unwrap());
    }
    wire.push_str(&StreamEvent::consensus(consensus).to_frame().unwrap());
    wire.push_str(&StreamEvent::Done.to_frame().unwrap());

    let mut reader = StreamReader::new();
    reader.feed(&wire);
    assert!(reader.is_done());
    let mut rebuilt = reader.finish().unwrap();
    rebuilt.personas.reverse();
    assert_eq!(rebuilt, expected);
}

#[test]
fn persona_file_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[[persona]]
persona_id = "cfo"
role = "Chief financial officer"
tone = "blunt"
dealbreakers = ["no unit economics"]

[persona.weighting]
clarity = 1
uniqueness = 0
persuasiveness = 3
"#
    )
    .unwrap();

    let set = PersonaSet::load(file.path()).unwrap();
    let cfo = set.get("cfo").unwrap();
    assert_eq!(cfo.dealbreakers, vec!["no unit economics"]);
    assert_eq!(cfo.weighting.shares()[2], 0.75);
}

#[test]
fn missing_persona_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PersonaSet::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}
