use bitcoin::Network;
use proptest::prelude::*;

use btcvault::keychain::path::{parse_path, HARDENED};
use btcvault::types::{
    AddressLookupConfig, AddressLookupUpdate, ScriptType, MAX_ACCOUNT_CEILING, MAX_WINDOW_CEILING,
};
use btcvault::KeyChain;

const TEST_PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn any_script_type() -> impl Strategy<Value = ScriptType> {
    prop::sample::select(ScriptType::ALL.to_vec())
}

proptest! {
    #[test]
    fn parsed_paths_roundtrip_through_display(
        purpose in prop::sample::select(vec![44u32, 49, 84, 86]),
        coin in 0u32..2,
        account in 0u32..1000,
        change in 0u32..2,
        index in 0u32..10_000,
    ) {
        let formatted = format!("m/{}'/{}'/{}'/{}/{}", purpose, coin, account, change, index);
        let parsed = parse_path(&formatted).expect("canonical path parses");
        prop_assert_eq!(parsed.purpose, Some(purpose));
        prop_assert_eq!(parsed.account, Some(account));
        prop_assert_eq!(parsed.address_index, Some(index));
        prop_assert_eq!(parsed.to_string(), formatted);
    }

    #[test]
    fn hardened_suffixes_are_equivalent(index in 0u32..HARDENED) {
        let tick = parse_path(&format!("m/{}'", index)).expect("tick parses");
        let aitch = parse_path(&format!("m/{}h", index)).expect("h parses");
        prop_assert_eq!(&tick, &aitch);
        prop_assert_eq!(tick.components[0].full_index(), index | HARDENED);
    }

    #[test]
    fn components_at_or_above_hardened_bit_rejected(
        offset in 0u32..1000,
    ) {
        let index = HARDENED as u64 + offset as u64;
        let path = format!("m/{}", index);
        prop_assert!(parse_path(&path).is_err());
    }

    #[test]
    fn lookup_config_never_exceeds_ceilings(
        account in any::<Option<u32>>(),
        receive in any::<Option<u32>>(),
        change in any::<Option<u32>>(),
    ) {
        let mut config = AddressLookupConfig::default();
        config.apply(AddressLookupUpdate {
            max_account_index: account,
            receive_window: receive,
            change_window: change,
        });
        prop_assert!(config.max_account_index <= MAX_ACCOUNT_CEILING);
        prop_assert!(config.receive_window <= MAX_WINDOW_CEILING);
        prop_assert!(config.change_window <= MAX_WINDOW_CEILING);
    }
}

proptest! {
    // Derivation runs real BIP32 math; keep the case count low.
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn derivation_is_deterministic_and_type_tagged(
        script_type in any_script_type(),
        account in 0u32..3,
        change in 0u32..2,
        index in 0u32..30,
    ) {
        let mut kc = KeyChain::new(Network::Bitcoin);
        kc.unlock(TEST_PHRASE, "").expect("test phrase unlocks");

        let first = kc.derive_address(script_type, account, change, index).expect("derives");
        let second = kc.derive_address(script_type, account, change, index).expect("derives");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.script_type, script_type);

        let reparsed = parse_path(&first.path).expect("emitted path parses");
        prop_assert_eq!(reparsed.purpose, Some(script_type.purpose()));
        prop_assert_eq!(reparsed.account, Some(account));
        prop_assert_eq!(reparsed.address_index, Some(index));
    }

    #[test]
    fn lookup_resolves_addresses_inside_default_windows(
        script_type in any_script_type(),
        change in 0u32..2,
        index in 0u32..10,
    ) {
        let mut kc = KeyChain::new(Network::Bitcoin);
        kc.unlock(TEST_PHRASE, "").expect("test phrase unlocks");

        let derived = kc.derive_address(script_type, 0, change, index).expect("derives");
        let found = kc
            .find_address_path(&derived.address)
            .expect("lookup runs")
            .expect("address is ours");
        prop_assert_eq!(found.path, derived.path);
    }
}
