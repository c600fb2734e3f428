
#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use crate::envelope::{Inbound, Outbound, ProtoError, RawEnvelope};
    use crate::payloads::{DidEncryptShares, Share, SizeChanged};

    fn id_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[a-z0-9]{1,12}".prop_map(Value::from),
            any::<u32>().prop_map(Value::from),
            ("[a-z]{1,6}", any::<u16>()).prop_map(|(g, n)| json!([g, n])),
        ]
    }

    proptest! {
        // Any tag outside the inbound set is rejected by name, never misrouted.
        #[test]
        fn test_unknown_tags_rejected(tag in "[a-zA-Z]{1,24}") {
            prop_assume!(!Inbound::TAGS.contains(&tag.as_str()));
            let raw = RawEnvelope::new(tag.clone(), Value::Null);
            match Inbound::decode(raw) {
                Err(ProtoError::UnknownType(t)) => prop_assert_eq!(t, tag),
                other => prop_assert!(false, "unexpected: {:?}", other),
            }
        }

        // Correlation identifiers survive an encode/decode cycle untouched.
        #[test]
        fn test_correlation_ids_preserved(
            ids in prop::collection::vec(id_value(), 0..8),
            device in id_value(),
            req_ids in id_value(),
        ) {
            let shares = ids
                .iter()
                .map(|id| (id.clone(), Share { y: json!("Y2k"), rest: Default::default() }))
                .collect::<Vec<_>>();
            let reply = Outbound::DidEncryptShares(DidEncryptShares {
                device_id: Some(device.clone()),
                encrypted_shares: shares,
                req_ids: Some(req_ids.clone()),
            });
            let decoded = Outbound::from_json(&reply.to_json()).unwrap();
            let Outbound::DidEncryptShares(back) = decoded else {
                panic!("wrong variant");
            };
            prop_assert_eq!(back.device_id, Some(device));
            prop_assert_eq!(back.req_ids, Some(req_ids));
            let back_ids: Vec<Value> = back.encrypted_shares.into_iter().map(|(id, _)| id).collect();
            prop_assert_eq!(back_ids, ids);
        }

        #[test]
        fn test_size_changed_decodes(id in "[a-z]{1,8}", width in any::<u32>(), height in any::<u32>()) {
            let text = json!({ "type": "onSizeChanged", "data": { "id": id, "width": width, "height": height } })
                .to_string();
            prop_assert_eq!(
                Inbound::from_json(&text).unwrap(),
                Inbound::SizeChanged(SizeChanged { id, width, height })
            );
        }
    }
}
