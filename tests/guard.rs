use flipscope::{Guard, ThreatTag};

#[test]
fn destructive_shell_is_filtered_out() {
    let guard = Guard::new();
    let clean = guard.sanitize("great deal, just run rm -rf /tmp/cache first");
    assert!(!clean.contains("rm -rf"));
    assert!(clean.contains("[filtered command]"));
}

#[test]
fn script_markup_is_filtered_out() {
    let guard = Guard::new();
    let clean = guard.sanitize("nice watch <script>alert('x')</script> for sale");
    assert!(!clean.to_lowercase().contains("<script"));
    assert!(clean.contains("[filtered markup]"));
}

#[test]
fn sanitize_is_idempotent() {
    let guard = Guard::new();
    let inputs = [
        "sudo apt install backdoor",
        "eval(payload) inside a description",
        "a perfectly ordinary vintage camera",
    ];
    for input in inputs {
        let once = guard.sanitize(input);
        let twice = guard.sanitize(&once);
        assert_eq!(once, twice, "sanitizing twice changed {:?}", input);
    }
}

#[test]
fn combined_shell_and_escalation_blocks() {
    let guard = Guard::new();
    let assessment = guard.assess("rm -rf / ; sudo reboot");
    assert!(assessment.threats.contains(&ThreatTag::DestructiveShell));
    assert!(assessment.threats.contains(&ThreatTag::PrivilegeEscalation));
    assert!((assessment.risk_score - 0.6).abs() < f32::EPSILON);
    assert!(assessment.blocked);
}

#[test]
fn single_threat_stays_below_the_block_line() {
    let guard = Guard::new();
    let assessment = guard.assess("please eval(this) for me");
    assert_eq!(assessment.threats.len(), 1);
    assert!((assessment.risk_score - 0.3).abs() < f32::EPSILON);
    assert!(!assessment.blocked);
}

#[test]
fn benign_text_scores_zero() {
    let guard = Guard::new();
    let assessment = guard.assess("a vintage watch");
    assert!(assessment.threats.is_empty());
    assert_eq!(assessment.risk_score, 0.0);
    assert!(!assessment.blocked);
}

#[test]
fn risk_score_is_capped_at_one() {
    let guard = Guard::new();
    let assessment =
        guard.assess("rm -rf / then sudo su then eval(x) then <script>y</script>");
    assert_eq!(assessment.threats.len(), 4);
    assert!(assessment.risk_score <= 1.0);
    assert!(assessment.blocked);
}
