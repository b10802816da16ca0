#![forbid(unsafe_code)]

//! End-to-end behaviour of the outbound pipeline.

use base64::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use ulriksdal_core::{algorithm, ns, Error, Result};
use ulriksdal_crypto::AlgorithmRegistry;
use ulriksdal_keys::{Key, KeyData, KeyMaterial, KeyResolver, KeyUsage, KeysManager};
use ulriksdal_stream::{
    Action, ChainCursor, CryptoProvider, DefaultCryptoProvider, EncryptEntryProcessor,
    EncryptionProperties, IdGenerator, Modifier, OutboundSecurity, PartScope, Processor,
    ProcessorChain, RandomIdGenerator, SecurePart, SecurityContext, SecurityProperties,
    TransformKind,
};
use ulriksdal_xml::{EndElement, EventReader, EventWriter, QName, StartElement, XmlEvent};

const AES_KEY: [u8; 16] = [0x11; 16];
const MAC_KEY: &[u8] = b"mac-key";

const PAYMENT: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><p:pay xmlns:p="urn:pay"><p:amount currency="EUR">100<p:note>a &amp; b</p:note></p:amount><p:to>Bob</p:to></p:pay></soap:Body></soap:Envelope>"#;

// ── Helpers ──────────────────────────────────────────────────────────

fn events(xml: &str) -> Vec<XmlEvent> {
    EventReader::read_all(xml).unwrap()
}

fn keys() -> Arc<KeysManager> {
    let mut keys = KeysManager::new();
    keys.add_key(Key::new(KeyData::Aes(AES_KEY.to_vec()), KeyUsage::Encrypt).with_name("enc"));
    keys.add_key(Key::new(KeyData::Hmac(MAC_KEY.to_vec()), KeyUsage::Sign).with_name("mac"));
    Arc::new(keys)
}

fn encrypting(parts: Vec<SecurePart>) -> SecurityProperties {
    let mut props = SecurityProperties::new()
        .with_action(Action::Encrypt)
        .encryption_token("enc")
        .encryption_algorithm(algorithm::AES128_CBC);
    props.encryption.parts = parts;
    props
}

fn signing(parts: Vec<SecurePart>) -> SecurityProperties {
    let mut props = SecurityProperties::new()
        .with_action(Action::Signature)
        .signature_token("mac");
    props.signature.parts = parts;
    props
}

/// Index of the first start element named `local` at or after `from`,
/// and of its matching end.
fn span_from(events: &[XmlEvent], local: &str, from: usize) -> (usize, usize) {
    let start = (from..events.len())
        .find(|&i| events[i].start().is_some_and(|s| s.name.local == local))
        .unwrap_or_else(|| panic!("no <{local}> in output"));
    let mut depth = 0usize;
    for (i, event) in events.iter().enumerate().skip(start) {
        match event {
            XmlEvent::StartElement(_) => depth += 1,
            XmlEvent::EndElement(_) => {
                depth -= 1;
                if depth == 0 {
                    return (start, i);
                }
            }
            _ => {}
        }
    }
    panic!("<{local}> is not closed");
}

fn span(events: &[XmlEvent], local: &str) -> (usize, usize) {
    span_from(events, local, 0)
}

fn count_starts(events: &[XmlEvent], local: &str) -> usize {
    events
        .iter()
        .filter(|e| e.start().is_some_and(|s| s.name.local == local))
        .count()
}

fn serialize(events: &[XmlEvent]) -> Vec<u8> {
    let mut writer = EventWriter::new();
    for event in events {
        writer.write(event).unwrap();
    }
    writer.into_bytes()
}

fn cipher_value(events: &[XmlEvent], from: usize) -> Vec<u8> {
    let (start, _) = span_from(events, ns::node::CIPHER_VALUE, from);
    let XmlEvent::Characters(text) = &events[start + 1] else {
        panic!("CipherValue has no text");
    };
    base64::engine::general_purpose::STANDARD.decode(text).unwrap()
}

fn text_of(events: &[XmlEvent], local: &str) -> String {
    let (start, _) = span(events, local);
    match &events[start + 1] {
        XmlEvent::Characters(text) => text.clone(),
        other => panic!("<{local}> has no text: {other:?}"),
    }
}

fn decrypt(ciphertext: &[u8]) -> Vec<u8> {
    AlgorithmRegistry::cipher(algorithm::AES128_CBC)
        .unwrap()
        .decrypt(&AES_KEY, ciphertext)
        .unwrap()
}

fn describe(event: &XmlEvent) -> String {
    match event {
        XmlEvent::StartElement(start) => {
            let mut out = format!("<{}", start.name.qualified());
            for attr in &start.attributes {
                out.push_str(&format!(" {}=\"{}\"", attr.name.qualified(), attr.value));
            }
            out.push('>');
            out
        }
        XmlEvent::EndElement(end) => format!("</{}>", end.name.qualified()),
        XmlEvent::Characters(text) => text.clone(),
        XmlEvent::EndDocument => "EOD".into(),
    }
}

fn security_children(xml: &str) -> Vec<String> {
    let doc = roxmltree::Document::parse(xml).unwrap();
    let security: Vec<_> = doc
        .descendants()
        .filter(|n| n.has_tag_name((ns::WSSE, ns::node::SECURITY)))
        .collect();
    assert_eq!(security.len(), 1, "exactly one wsse:Security header");
    security[0]
        .children()
        .filter(|n| n.is_element())
        .map(|n| n.tag_name().name().to_owned())
        .collect()
}

/// `prefix` followed by a per-generator counter.
#[derive(Default)]
struct Sequential(AtomicUsize);

impl IdGenerator for Sequential {
    fn generate_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ── Identity ─────────────────────────────────────────────────────────

#[test]
fn test_no_actions_is_identity() {
    let security = OutboundSecurity::new(SecurityProperties::new(), keys()).unwrap();
    let input = events(PAYMENT);
    assert_eq!(security.secure_events(input.clone()).unwrap(), input);
}

#[test]
fn test_rules_without_match_are_identity() {
    let props = encrypting(vec![SecurePart::element("urn:other", "amount")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let input = events(PAYMENT);
    assert_eq!(security.secure_events(input.clone()).unwrap(), input);
}

// ── Encryption ───────────────────────────────────────────────────────

#[test]
fn test_element_encryption_decrypts_to_original_subtree() {
    let config = EncryptionProperties {
        token_id: Some("enc".into()),
        algorithm: algorithm::AES128_CBC.into(),
        parts: vec![SecurePart::element("urn:pay", "amount")],
    };
    let mut chain = ProcessorChain::new(SecurityContext::new(keys()));
    chain.push(Box::new(EncryptEntryProcessor::new(
        Arc::new(config),
        Arc::new(DefaultCryptoProvider),
        Arc::new(RandomIdGenerator),
    )));

    let input = events(PAYMENT);
    let mut out: Vec<XmlEvent> = Vec::new();
    for event in input.clone() {
        chain.process_event(event, &mut out).unwrap();
    }

    let (a, b) = span(&input, "amount");
    let (i, j) = span(&out, ns::node::ENCRYPTED_DATA);
    assert_eq!(out[..i], input[..a]);
    assert_eq!(out[j + 1..], input[b + 1..]);

    let encrypted_data = out[i].start().unwrap();
    assert_eq!(encrypted_data.attribute("", "Type"), Some(ns::ENC_TYPE_ELEMENT));
    let plaintext = decrypt(&cipher_value(&out, i));
    assert_eq!(plaintext, serialize(&input[a..=b]));
    assert_eq!(
        String::from_utf8(plaintext).unwrap(),
        r#"<p:amount xmlns:p="urn:pay" currency="EUR">100<p:note>a &amp; b</p:note></p:amount>"#
    );
}

#[test]
fn test_content_encryption_keeps_element_tags() {
    let props = encrypting(vec![
        SecurePart::element("urn:pay", "amount").with_modifier(Modifier::Content)
    ]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let input = events(PAYMENT);
    let out = security.secure_events(input.clone()).unwrap();

    let (a, b) = span(&input, "amount");
    let (s, e) = span(&out, "amount");
    assert_eq!(out[s], input[a]);
    assert_eq!(out[e], input[b]);

    let (i, j) = span(&out, ns::node::ENCRYPTED_DATA);
    assert_eq!((i, j), (s + 1, e - 1));
    let encrypted_data = out[i].start().unwrap();
    assert_eq!(encrypted_data.attribute("", "Type"), Some(ns::ENC_TYPE_CONTENT));
    assert_eq!(decrypt(&cipher_value(&out, i)), serialize(&input[a + 1..b]));
}

#[derive(Debug)]
struct FixedKey;

impl KeyMaterial for FixedKey {
    fn id(&self) -> &str {
        "key-1"
    }

    fn secret_key(&self, algorithm: &str) -> Result<Vec<u8>> {
        match algorithm {
            "A" => Ok(b"k".to_vec()),
            other => Err(Error::KeyResolution(format!("key-1 cannot be used with {other}"))),
        }
    }
}

struct FixedResolver;

impl KeyResolver for FixedResolver {
    fn resolve(&self, token_id: &str) -> Result<Arc<dyn KeyMaterial>> {
        match token_id {
            "key-1" => Ok(Arc::new(FixedKey)),
            other => Err(Error::KeyResolution(format!("unknown token {other}"))),
        }
    }
}

/// Writes `plaintext|key|algorithm` instead of ciphertext.
struct Tagging;

impl CryptoProvider for Tagging {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        let plaintext = String::from_utf8_lossy(plaintext);
        let key = String::from_utf8_lossy(key);
        Ok(format!("{plaintext}|{key}|{algorithm}").into_bytes())
    }
}

#[test]
fn test_amount_content_scenario() {
    let props = SecurityProperties::new()
        .with_action(Action::Encrypt)
        .encryption_token("key-1")
        .encryption_algorithm("A")
        .encrypt_part(SecurePart::element("", "amount").with_modifier(Modifier::Content));
    let security = OutboundSecurity::new(props, Arc::new(FixedResolver))
        .unwrap()
        .with_crypto_provider(Arc::new(Tagging))
        .with_id_generator(Arc::new(Sequential::default()));

    let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><amount>100</amount></soap:Body></soap:Envelope>"#;
    let mut message = security.process_message();
    let mut out: Vec<XmlEvent> = Vec::new();
    for event in events(xml) {
        message.process_event(event, &mut out).unwrap();
    }
    assert!(message.is_finished());

    let (s, e) = span(&out, "amount");
    let described: Vec<String> = out[s..=e].iter().map(describe).collect();
    let cipher = base64::engine::general_purpose::STANDARD.encode("100|k|A");
    let expected = vec![
        "<amount>".to_owned(),
        format!(r#"<xenc:EncryptedData Id="ED-2" Type="{}">"#, ns::ENC_TYPE_CONTENT),
        r#"<xenc:EncryptionMethod Algorithm="A">"#.to_owned(),
        "</xenc:EncryptionMethod>".to_owned(),
        "<ds:KeyInfo>".to_owned(),
        "<wsse:SecurityTokenReference>".to_owned(),
        r##"<wsse:Reference URI="#key-1">"##.to_owned(),
        "</wsse:Reference>".to_owned(),
        "</wsse:SecurityTokenReference>".to_owned(),
        "</ds:KeyInfo>".to_owned(),
        "<xenc:CipherData>".to_owned(),
        "<xenc:CipherValue>".to_owned(),
        cipher,
        "</xenc:CipherValue>".to_owned(),
        "</xenc:CipherData>".to_owned(),
        "</xenc:EncryptedData>".to_owned(),
        "</amount>".to_owned(),
    ];
    assert_eq!(described, expected);

    let parts = message.context().parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].id, "EP-1");
    assert_eq!(parts[0].key_id, "key-1");
    assert_eq!(parts[0].algorithm, "A");
    assert_eq!(parts[0].reference_id.as_deref(), Some("ED-2"));
    assert_eq!(message.context().encryption_token_id.as_deref(), Some("key-1"));
}

#[test]
fn test_header_block_is_wrapped_in_encrypted_header() {
    let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Header><h:token xmlns:h="urn:h" soap:mustUnderstand="1" soap:actor="urn:next" kind="t">abc</h:token></soap:Header><soap:Body><x/></soap:Body></soap:Envelope>"#;
    let props = encrypting(vec![SecurePart::element("urn:h", "token")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let out = security.secure_events(events(xml)).unwrap();

    assert_eq!(count_starts(&out, "token"), 0);
    let (i, j) = span(&out, ns::node::ENCRYPTED_HEADER);
    let wrapper = out[i].start().unwrap();
    assert!(wrapper.name.is(ns::WSSE11, ns::node::ENCRYPTED_HEADER));
    let path: Vec<&str> = wrapper.path.iter().map(|q| q.local.as_str()).collect();
    assert_eq!(path, vec!["Envelope", "Header", "EncryptedHeader"]);
    assert_eq!(wrapper.attribute(ns::SOAP11, "mustUnderstand"), Some("1"));
    assert_eq!(wrapper.attribute(ns::SOAP11, "actor"), Some("urn:next"));
    assert_eq!(wrapper.attribute("", "kind"), None);
    assert!(wrapper.attribute(ns::WSU, "Id").unwrap().starts_with("EH-"));

    // EncryptedData sits inside the wrapper, which closes last.
    let (d, e) = span(&out, ns::node::ENCRYPTED_DATA);
    assert_eq!((d, e), (i + 1, j - 1));
    assert!(matches!(
        &out[j],
        XmlEvent::EndElement(end) if end.name.local == ns::node::ENCRYPTED_HEADER
    ));
    assert!(out[j + 1].start().is_some_and(|s| s.name.is(ns::WSSE, ns::node::SECURITY)));

    let plaintext = decrypt(&cipher_value(&out, d));
    assert!(String::from_utf8(plaintext).unwrap().starts_with("<h:token "));
}

#[test]
fn test_content_rule_on_header_block_nests_wrapper_in_block() {
    let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Header><h:token xmlns:h="urn:h" soap:mustUnderstand="1">abc</h:token></soap:Header><soap:Body/></soap:Envelope>"#;
    let rule = SecurePart::element("urn:h", "token").with_modifier(Modifier::Content);
    let props = encrypting(vec![rule]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let out = security.secure_events(events(xml)).unwrap();

    assert_eq!(count_starts(&out, ns::node::ENCRYPTED_HEADER), 1);
    assert_eq!(count_starts(&out, ns::node::ENCRYPTED_DATA), 1);

    // token > EncryptedHeader > EncryptedData, wrapper closed before </h:token>.
    let (t, u) = span(&out, "token");
    let (i, j) = span(&out, ns::node::ENCRYPTED_HEADER);
    let (d, e) = span(&out, ns::node::ENCRYPTED_DATA);
    assert_eq!((i, j), (t + 1, u - 1));
    assert_eq!((d, e), (i + 1, j - 1));

    let block = out[t].start().unwrap();
    assert_eq!(block.attribute(ns::SOAP11, "mustUnderstand"), Some("1"));
    let wrapper = out[i].start().unwrap();
    assert!(wrapper.name.is(ns::WSSE11, ns::node::ENCRYPTED_HEADER));
    assert_eq!(wrapper.attribute(ns::SOAP11, "mustUnderstand"), Some("1"));
    let path: Vec<&str> = wrapper.path.iter().map(|q| q.local.as_str()).collect();
    assert_eq!(path, vec!["Envelope", "Header", "token", "EncryptedHeader"]);
    assert_eq!(out[d].start().unwrap().attribute("", "Type"), Some(ns::ENC_TYPE_CONTENT));

    assert_eq!(decrypt(&cipher_value(&out, d)), b"abc");
}

#[test]
fn test_two_targets_get_distinct_envelopes_and_references() {
    let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><a>1</a><b>2</b></soap:Body></soap:Envelope>"#;
    let props = encrypting(vec![SecurePart::element("", "a"), SecurePart::element("", "b")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let mut message = security.process_message();
    let mut out: Vec<XmlEvent> = Vec::new();
    for event in events(xml) {
        message.process_event(event, &mut out).unwrap();
    }

    let ids: Vec<String> = out
        .iter()
        .filter_map(|e| e.start())
        .filter(|s| s.name.is(ns::ENC, ns::node::ENCRYPTED_DATA))
        .map(|s| s.attribute("", "Id").unwrap().to_owned())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    let parts = message.context().parts();
    let references: Vec<&str> = parts.iter().filter_map(|p| p.reference_id.as_deref()).collect();
    assert_eq!(references, vec![ids[0].as_str(), ids[1].as_str()]);
    assert_ne!(parts[0].id, parts[1].id);

    let data_refs: Vec<String> = out
        .iter()
        .filter_map(|e| e.start())
        .filter(|s| s.name.is(ns::ENC, ns::node::DATA_REFERENCE))
        .map(|s| s.attribute("", "URI").unwrap().to_owned())
        .collect();
    assert_eq!(data_refs, vec![format!("#{}", ids[0]), format!("#{}", ids[1])]);

    // The reference list precedes the body, inside a created security header.
    let (list, _) = span(&out, ns::node::REFERENCE_LIST);
    let (body, _) = span(&out, ns::node::BODY);
    assert!(list < body);
}

#[test]
fn test_nested_matches_give_one_part_per_target() {
    let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><n><n><n>deep</n></n></n></soap:Body></soap:Envelope>"#;
    let props = encrypting(vec![SecurePart::element("", "n"), SecurePart::any()]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let mut message = security.process_message();
    let mut out: Vec<XmlEvent> = Vec::new();
    for event in events(xml) {
        message.process_event(event, &mut out).unwrap();
    }
    // `any` matches the envelope itself first and swallows everything.
    assert_eq!(message.context().parts().len(), 1);
    assert_eq!(count_starts(&out, ns::node::ENCRYPTED_DATA), 1);

    let props = encrypting(vec![SecurePart::element("", "n")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let out = security.secure_events(events(xml)).unwrap();
    assert_eq!(count_starts(&out, ns::node::ENCRYPTED_DATA), 1);
    assert_eq!(count_starts(&out, "n"), 0);
}

#[test]
fn test_whole_body_encryption_still_lists_reference() {
    let rules = vec![
        SecurePart::element(ns::SOAP11, ns::node::BODY).with_modifier(Modifier::Content),
        SecurePart::any().with_scope(PartScope::Header),
    ];
    let security = OutboundSecurity::new(encrypting(rules), keys()).unwrap();
    let secured = security.secure_document(PAYMENT).unwrap();

    let doc = roxmltree::Document::parse(&secured).unwrap();
    let body = doc
        .descendants()
        .find(|n| n.has_tag_name((ns::SOAP11, ns::node::BODY)))
        .unwrap();
    let children: Vec<&str> = body
        .children()
        .filter(|n| n.is_element())
        .map(|n| n.tag_name().name())
        .collect();
    assert_eq!(children, vec![ns::node::ENCRYPTED_DATA]);
    assert_eq!(security_children(&secured), vec![ns::node::REFERENCE_LIST]);
}

#[test]
fn test_key_failure_records_no_part() {
    for props in [
        encrypting(vec![SecurePart::element("urn:pay", "amount")]).encryption_token("missing"),
        encrypting(vec![SecurePart::element("urn:pay", "amount")])
            .encryption_algorithm(algorithm::AES256_CBC),
    ] {
        let security = OutboundSecurity::new(props, keys()).unwrap();
        let mut message = security.process_message();
        let mut out: Vec<XmlEvent> = Vec::new();
        let mut result = Ok(());
        for event in events(PAYMENT) {
            result = message.process_event(event, &mut out);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::KeyResolution(_))), "{result:?}");
        assert!(message.context().parts().is_empty());
        assert!(!message.context().active_transforms().is_active(TransformKind::Encrypt));
        assert_eq!(count_starts(&out, ns::node::ENCRYPTED_DATA), 0);
        assert!(message.is_poisoned());
        assert!(!message.is_finished());
    }
}

/// Fails every encryption.
struct Broken;

impl CryptoProvider for Broken {
    fn encrypt(&self, _plaintext: &[u8], _key: &[u8], _algorithm: &str) -> Result<Vec<u8>> {
        Err(Error::Crypto("padding".into()))
    }
}

#[test]
fn test_crypto_failure_emits_no_envelope() {
    let props = encrypting(vec![SecurePart::element("urn:pay", "amount")]);
    let security = OutboundSecurity::new(props, keys())
        .unwrap()
        .with_crypto_provider(Arc::new(Broken));
    let mut message = security.process_message();
    let mut out: Vec<XmlEvent> = Vec::new();
    let mut result = Ok(());
    for event in events(PAYMENT) {
        result = message.process_event(event, &mut out);
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(Error::TransformFailure(_))), "{result:?}");
    assert_eq!(count_starts(&out, ns::node::ENCRYPTED_DATA), 0);
    assert_eq!(count_starts(&out, "amount"), 0);
}

#[test]
fn test_non_soap_encryption_has_no_reference_list() {
    let props = encrypting(vec![SecurePart::element("", "secret")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let out = security.secure_events(events("<doc><secret>x</secret></doc>")).unwrap();
    assert_eq!(count_starts(&out, ns::node::ENCRYPTED_DATA), 1);
    assert_eq!(count_starts(&out, ns::node::REFERENCE_LIST), 0);
    assert_eq!(count_starts(&out, ns::node::SECURITY), 0);
}

#[test]
fn test_existing_security_header_is_reused() {
    let xml = format!(
        r#"<soap:Envelope xmlns:soap="{}" xmlns:wsu="{}"><soap:Header><wsse:Security xmlns:wsse="{}"><wsu:Timestamp wsu:Id="ts"/></wsse:Security></soap:Header><soap:Body><amount>1</amount></soap:Body></soap:Envelope>"#,
        ns::SOAP11,
        ns::WSU,
        ns::WSSE
    );
    let props = encrypting(vec![SecurePart::element("", "amount")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let secured = security.secure_document(&xml).unwrap();
    assert_eq!(security_children(&secured), vec!["Timestamp", "ReferenceList"]);
}

#[test]
fn test_created_header_carries_soap12_role() {
    let xml = format!(
        r#"<env:Envelope xmlns:env="{}"><env:Body><amount>1</amount></env:Body></env:Envelope>"#,
        ns::SOAP12
    );
    let props = encrypting(vec![SecurePart::element("", "amount")]).with_actor("urn:next-hop");
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let secured = security.secure_document(&xml).unwrap();

    let doc = roxmltree::Document::parse(&secured).unwrap();
    let header = doc
        .root_element()
        .first_element_child()
        .unwrap();
    assert!(header.has_tag_name((ns::SOAP12, ns::node::HEADER)));
    let security_header = header.first_element_child().unwrap();
    assert!(security_header.has_tag_name((ns::WSSE, ns::node::SECURITY)));
    assert_eq!(security_header.attribute((ns::SOAP12, "mustUnderstand")), Some("true"));
    assert_eq!(security_header.attribute((ns::SOAP12, "role")), Some("urn:next-hop"));
}

#[test]
fn test_default_namespace_envelope_gets_prefixed_attributes() {
    let xml = format!(
        r#"<Envelope xmlns="{}"><Body><amount xmlns="">1</amount></Body></Envelope>"#,
        ns::SOAP11
    );
    let props = encrypting(vec![SecurePart::element("", "amount")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let secured = security.secure_document(&xml).unwrap();

    let doc = roxmltree::Document::parse(&secured).unwrap();
    let security_header = doc
        .descendants()
        .find(|n| n.has_tag_name((ns::WSSE, ns::node::SECURITY)))
        .unwrap();
    assert_eq!(security_header.attribute((ns::SOAP11, "mustUnderstand")), Some("1"));
    assert!(security_header
        .parent_element()
        .unwrap()
        .has_tag_name((ns::SOAP11, ns::node::HEADER)));
}

// ── Signature ────────────────────────────────────────────────────────

const SIGNED: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"><soap:Body wsu:Id="body-1"><p:pay xmlns:p="urn:pay"><p:amount>100</p:amount></p:pay></soap:Body></soap:Envelope>"#;

#[test]
fn test_signature_digest_and_value() {
    let props = signing(vec![SecurePart::element(ns::SOAP11, ns::node::BODY)]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let input = events(SIGNED);
    let out = security.secure_events(input.clone()).unwrap();

    // The body itself passes through untouched.
    let (a, b) = span(&input, ns::node::BODY);
    let (s, e) = span(&out, ns::node::BODY);
    assert_eq!(out[s..=e], input[a..=b]);

    let canonical = ulriksdal_c14n::canonicalize(&input[a..=b]).unwrap();
    let expected = ulriksdal_crypto::digest::digest(algorithm::SHA256, &canonical).unwrap();
    let engine = base64::engine::general_purpose::STANDARD;
    assert_eq!(engine.decode(text_of(&out, ns::node::DIGEST_VALUE)).unwrap(), expected);

    let (r, _) = span(&out, ns::node::REFERENCE);
    assert_eq!(out[r].start().unwrap().attribute("", "URI"), Some("#body-1"));

    let (si, sj) = span(&out, ns::node::SIGNED_INFO);
    let signed_info = ulriksdal_c14n::canonicalize(&out[si..=sj]).unwrap();
    let value = engine.decode(text_of(&out, ns::node::SIGNATURE_VALUE)).unwrap();
    let hmac = AlgorithmRegistry::signature(algorithm::HMAC_SHA256).unwrap();
    assert!(hmac.verify(MAC_KEY, &signed_info, &value).unwrap());
}

#[test]
fn test_signature_adds_missing_id() {
    let props = signing(vec![SecurePart::element("urn:pay", "amount")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let secured = security.secure_document(SIGNED).unwrap();

    let doc = roxmltree::Document::parse(&secured).unwrap();
    let amount = doc
        .descendants()
        .find(|n| n.has_tag_name(("urn:pay", "amount")))
        .unwrap();
    let id = amount.attribute((ns::WSU, "Id")).unwrap();
    let reference = doc
        .descendants()
        .find(|n| n.has_tag_name((ns::DSIG, ns::node::REFERENCE)))
        .unwrap();
    assert_eq!(reference.attribute("URI"), Some(format!("#{id}").as_str()));
}

#[test]
fn test_signature_requires_soap_envelope() {
    let props = signing(vec![SecurePart::element("", "secret")]);
    let security = OutboundSecurity::new(props, keys()).unwrap();
    let result = security.secure_events(events("<doc><secret>x</secret></doc>"));
    assert!(matches!(result, Err(Error::MalformedInput(_))));
}

#[test]
fn test_header_order_follows_actions() {
    let body = SecurePart::element(ns::SOAP11, ns::node::BODY);
    let amount = SecurePart::element("urn:pay", "amount").with_modifier(Modifier::Content);

    let sign_then_encrypt = signing(vec![body.clone()])
        .with_action(Action::Encrypt)
        .encryption_token("enc")
        .encryption_algorithm(algorithm::AES128_CBC)
        .encrypt_part(amount.clone());
    let security = OutboundSecurity::new(sign_then_encrypt, keys()).unwrap();
    let secured = security.secure_document(SIGNED).unwrap();
    assert_eq!(security_children(&secured), vec!["ReferenceList", "Signature"]);

    let mut encrypt_then_sign = encrypting(vec![amount])
        .with_action(Action::Signature)
        .signature_token("mac");
    encrypt_then_sign.signature.parts = vec![body];
    let security = OutboundSecurity::new(encrypt_then_sign, keys()).unwrap();
    let secured = security.secure_document(SIGNED).unwrap();
    assert_eq!(security_children(&secured), vec!["Signature", "ReferenceList"]);
}

// ── Chain protocol and input checks ──────────────────────────────────

struct PassThrough;

impl Processor for PassThrough {
    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainCursor<'_>) -> Result<()> {
        chain.forward(event)
    }

    fn name(&self) -> &'static str {
        "pass-through"
    }
}

#[test]
fn test_unknown_handle_is_chain_protocol_error() {
    let mut chain = ProcessorChain::new(SecurityContext::new(keys()));
    let handle = chain.push(Box::new(PassThrough));
    chain.remove(handle).unwrap();
    assert!(matches!(chain.remove(handle), Err(Error::ChainProtocol(_))));
    assert!(matches!(
        chain.insert_after(handle, Box::new(PassThrough)),
        Err(Error::ChainProtocol(_))
    ));
    assert!(matches!(
        chain.insert_before(handle, Box::new(PassThrough)),
        Err(Error::ChainProtocol(_))
    ));
}

#[test]
fn test_unmatched_end_is_malformed_input() {
    let security = OutboundSecurity::new(SecurityProperties::new(), keys()).unwrap();
    let mut message = security.process_message();
    let mut out: Vec<XmlEvent> = Vec::new();
    let start = StartElement::new(QName::local("a"), &[]);
    message.process_event(XmlEvent::StartElement(start), &mut out).unwrap();
    let end = XmlEvent::EndElement(EndElement::new(QName::local("b")));
    assert!(matches!(message.process_event(end, &mut out), Err(Error::MalformedInput(_))));

    let mut message = security.process_message();
    let mut out: Vec<XmlEvent> = Vec::new();
    let start = StartElement::new(QName::local("a"), &[]);
    message.process_event(XmlEvent::StartElement(start), &mut out).unwrap();
    assert!(matches!(
        message.process_event(XmlEvent::EndDocument, &mut out),
        Err(Error::MalformedInput(_))
    ));
}

// ── Concurrency ──────────────────────────────────────────────────────

#[test]
fn test_messages_on_threads_are_independent() {
    let props = encrypting(vec![SecurePart::element("", "amount")]);
    let security = Arc::new(OutboundSecurity::new(props, keys()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let security = Arc::clone(&security);
            std::thread::spawn(move || {
                let xml = format!(
                    r#"<soap:Envelope xmlns:soap="{}"><soap:Body><amount>{n}</amount></soap:Body></soap:Envelope>"#,
                    ns::SOAP11
                );
                let mut message = security.process_message();
                let mut out: Vec<XmlEvent> = Vec::new();
                for event in events(&xml) {
                    message.process_event(event, &mut out).unwrap();
                }
                assert_eq!(message.context().parts().len(), 1);
                let plaintext = decrypt(&cipher_value(&out, 0));
                (n, String::from_utf8(plaintext).unwrap())
            })
        })
        .collect();

    for handle in handles {
        let (n, plaintext) = handle.join().unwrap();
        assert_eq!(plaintext, format!("<amount>{n}</amount>"));
    }
}
