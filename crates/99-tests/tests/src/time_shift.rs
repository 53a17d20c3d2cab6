use dispatch::{FactoryConfig, Filter, PacketFactory};
use proptest::prelude::*;
use runnable::Runnable;

#[derive(Debug, PartialEq)]
struct Reading(u64);
#[derive(Debug, PartialEq)]
struct Lag {
    now: u64,
    then: u64,
}

struct LagMeter;

fn lag_factory(shift: u32, min_history: usize) -> PacketFactory {
    let factory = PacketFactory::new(FactoryConfig { min_history });
    factory
        .register(
            Filter::builder::<LagMeter>()
                .input::<Reading>()
                .prev::<Reading>(shift)
                .output::<Lag>()
                .build(move |call| {
                    let lag = Lag {
                        now: call.get::<Reading>()?.0,
                        then: call.prev::<Reading>(shift)?.0,
                    };
                    call.put(lag)?;
                    Ok(())
                })
                .unwrap(),
        )
        .unwrap();
    factory
}

#[test]
fn history_grows_to_the_deepest_shift() {
    let factory = lag_factory(3, 1);
    assert_eq!(factory.history_depth(), 3);
    let factory = lag_factory(1, 5);
    assert_eq!(factory.history_depth(), 5);
}

#[test]
fn stopped_factory_forgets_its_history() {
    let factory = lag_factory(1, 0);
    factory.start().unwrap();
    let first = factory.new_packet().unwrap();
    first.decorate(Reading(0)).unwrap();
    factory.stop();
    assert!(factory.new_packet().is_err());
    assert_eq!(factory.issued(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    #[test]
    fn shifted_reader_sees_exactly_k_back(shift in 1u32..5, packets in 1u64..16, extra in 0usize..3) {
        let factory = lag_factory(shift, extra);
        for sequence in 0..packets {
            let packet = factory.new_packet().unwrap();
            prop_assert_eq!(packet.sequence(), sequence);
            packet.decorate(Reading(sequence * 10)).unwrap();

            let lag = packet.get::<Lag>();
            if sequence < u64::from(shift) {
                prop_assert!(lag.is_none());
                prop_assert_eq!(packet.pending_filters().len(), 1);
            } else {
                let lag = lag.unwrap();
                prop_assert_eq!(lag.now, sequence * 10);
                prop_assert_eq!(lag.then, (sequence - u64::from(shift)) * 10);
            }
        }
    }
}
