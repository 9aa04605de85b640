use super::*;

#[test]
fn challenge_decodes_to_expected_length() {
    let challenge = generate_challenge();
    let raw = general_purpose::STANDARD
        .decode(&challenge)
        .expect("challenge should be valid base64");
    assert_eq!(raw.len(), CHALLENGE_LEN);
}

#[test]
fn challenges_are_unique() {
    assert_ne!(generate_challenge(), generate_challenge());
}

#[test]
fn proof_verifies_for_correct_password() {
    let challenge = generate_challenge();
    let proof = compute_proof("hunter2", &challenge).expect("compute failed");

    assert!(verify_proof("hunter2", &challenge, &proof));
}

#[test]
fn wrong_password_fails() {
    let challenge = generate_challenge();
    let proof = compute_proof("hunter2", &challenge).expect("compute failed");

    assert!(!verify_proof("letmein", &challenge, &proof));
}

#[test]
fn proof_is_bound_to_the_challenge() {
    let proof = compute_proof("hunter2", &generate_challenge()).expect("compute failed");

    assert!(!verify_proof("hunter2", &generate_challenge(), &proof));
}

#[test]
fn tampered_proof_fails() {
    let challenge = generate_challenge();
    let proof = compute_proof("hunter2", &challenge).expect("compute failed");
    let mut raw = general_purpose::STANDARD.decode(&proof).unwrap();
    raw[0] ^= 0xff;
    let tampered = general_purpose::STANDARD.encode(raw);

    assert!(!verify_proof("hunter2", &challenge, &tampered));
}

#[test]
fn malformed_base64_fails_closed() {
    assert!(!verify_proof("hunter2", "not base64!!", "also not base64!!"));
    assert!(compute_proof("hunter2", "not base64!!").is_err());
}
