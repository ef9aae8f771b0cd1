//! A banana farm: the canonical demonstration model for `kestrel`.
//!
//! The farm tracks an edible fruit level, a peel level, and the current
//! producer. Its activities cover every kind of task behavior the kernel
//! supports: instantaneous emits, delays, runtime spawns with awaits,
//! register writes that can conflict, and a deliberately faulty activity.

use kestrel::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which end of the banana to start peeling from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    FromStem,
    FromTip,
}

pub struct DirectionMapper;

impl ValueMapper for DirectionMapper {
    type Value = Direction;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Variant(vec!["fromStem".to_string(), "fromTip".to_string()])
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<Direction, String> {
        match value.as_text() {
            Some("fromStem") => Ok(Direction::FromStem),
            Some("fromTip") => Ok(Direction::FromTip),
            _ => Err(format!("expected \"fromStem\" or \"fromTip\", got {value:?}")),
        }
    }

    fn serialize(&self, value: &Direction) -> SerializedValue {
        match value {
            Direction::FromStem => "fromStem".into(),
            Direction::FromTip => "fromTip".into(),
        }
    }
}

/// Serializes the producer register as a map of its value and conflict flag.
pub struct ProducerMapper;

impl ValueMapper for ProducerMapper {
    type Value = RegisterState<String>;

    fn value_schema(&self) -> ValueSchema {
        ValueSchema::Struct(BTreeMap::from([
            ("value".to_string(), ValueSchema::Text),
            ("conflicted".to_string(), ValueSchema::Boolean),
        ]))
    }

    fn deserialize(&self, value: &SerializedValue) -> Result<RegisterState<String>, String> {
        let map = value.as_map().ok_or("expected a map")?;
        Ok(RegisterState {
            value: map
                .get("value")
                .and_then(SerializedValue::as_text)
                .ok_or("missing `value`")?
                .to_string(),
            conflicted: map
                .get("conflicted")
                .and_then(SerializedValue::as_boolean)
                .ok_or("missing `conflicted`")?,
        })
    }

    fn serialize(&self, state: &RegisterState<String>) -> SerializedValue {
        SerializedValue::Map(BTreeMap::from([
            ("value".to_string(), state.value.as_str().into()),
            ("conflicted".to_string(), state.conflicted.into()),
        ]))
    }
}

/// Handles into the farm's cells, for activities and tests.
#[derive(Copy, Clone)]
pub struct Banananation {
    pub fruit: CellHandle<AccumulatorCell>,
    pub peel: CellHandle<AccumulatorCell>,
    pub producer: CellHandle<RegisterCell<String>>,
}

pub struct PeelBanana {
    pub direction: Direction,
    pub farm: Banananation,
}

impl Activity for PeelBanana {
    fn label(&self) -> &str {
        "PeelBanana"
    }

    fn run(&self, ctx: &mut TaskContext) -> TaskResult {
        if self.direction == Direction::FromStem {
            ctx.emit(self.farm.peel, -1.0)?;
        }
        ctx.emit(self.farm.fruit, -1.0)
    }
}

pub struct BiteBanana {
    pub size: f64,
    pub farm: Banananation,
}

impl Activity for BiteBanana {
    fn label(&self) -> &str {
        "BiteBanana"
    }

    fn run(&self, ctx: &mut TaskContext) -> TaskResult {
        if self.size <= 0.0 {
            return Err(anyhow!("bite size must be positive, got {}", self.size).into());
        }
        ctx.emit(self.farm.fruit, -self.size)
    }

    fn computed_attributes(&self) -> SerializedValue {
        SerializedValue::Map(BTreeMap::from([(
            "biteSize".to_string(),
            self.size.into(),
        )]))
    }
}

/// Takes time: the fruit appears when the growing finishes, not before.
pub struct GrowBanana {
    pub quantity: f64,
    pub growing_duration: Duration,
    pub farm: Banananation,
}

impl Activity for GrowBanana {
    fn label(&self) -> &str {
        "GrowBanana"
    }

    fn run(&self, ctx: &mut TaskContext) -> TaskResult {
        ctx.delay(self.growing_duration)?;
        ctx.emit(self.farm.fruit, self.quantity)
    }
}

/// Grows a staggered bunch concurrently and reports once all are done.
pub struct GrowBunch {
    pub quantity: f64,
    pub count: i64,
    pub farm: Banananation,
}

impl Activity for GrowBunch {
    fn label(&self) -> &str {
        "GrowBunch"
    }

    fn run(&self, ctx: &mut TaskContext) -> TaskResult {
        for i in 1..=self.count {
            ctx.spawn(Arc::new(GrowBanana {
                quantity: self.quantity,
                growing_duration: Duration::from_seconds(i as f64),
                farm: self.farm,
            }))?;
        }
        ctx.wait_for_children()
    }
}

pub struct ChangeProducer {
    pub producer: String,
    pub farm: Banananation,
}

impl Activity for ChangeProducer {
    fn label(&self) -> &str {
        "ChangeProducer"
    }

    fn run(&self, ctx: &mut TaskContext) -> TaskResult {
        ctx.emit(self.farm.producer, RegisterEffect::set(self.producer.clone()))
    }
}

/// Always fails after spoiling some fruit. Exists to demonstrate fault
/// isolation; the spoilage stays in the profiles.
pub struct RottenBanana {
    pub farm: Banananation,
}

impl Activity for RottenBanana {
    fn label(&self) -> &str {
        "RottenBanana"
    }

    fn run(&self, ctx: &mut TaskContext) -> TaskResult {
        ctx.emit(self.farm.fruit, -1.0)?;
        Err(anyhow!("the banana was rotten all along").into())
    }
}

fn real_arg(args: &BTreeMap<String, SerializedValue>, name: &str) -> Result<f64, String> {
    args.get(name)
        .and_then(SerializedValue::as_real)
        .ok_or_else(|| format!("missing or non-real argument `{name}`"))
}

fn int_arg(args: &BTreeMap<String, SerializedValue>, name: &str) -> Result<i64, String> {
    args.get(name)
        .and_then(SerializedValue::as_int)
        .ok_or_else(|| format!("missing or non-integer argument `{name}`"))
}

fn text_arg(args: &BTreeMap<String, SerializedValue>, name: &str) -> Result<String, String> {
    args.get(name)
        .and_then(SerializedValue::as_text)
        .map(str::to_string)
        .ok_or_else(|| format!("missing or non-text argument `{name}`"))
}

/// Builds the farm: three resources and six activity types.
pub fn model() -> Result<(MissionModel, Banananation)> {
    let mut builder = MissionModel::builder();

    let fruit = builder.real("/fruit", AccumulatorCell::new(4.0), |&level| {
        RealDynamics::constant(level)
    })?;
    let peel = builder.real("/peel", AccumulatorCell::new(4.0), |&level| {
        RealDynamics::constant(level)
    })?;
    let producer = builder.discrete(
        "/producer",
        RegisterCell::new("Chiquita".to_string()),
        ProducerMapper,
        RegisterState::clone,
    )?;
    let farm = Banananation {
        fruit,
        peel,
        producer,
    };

    builder.activity_type(ActivityType::new(
        "PeelBanana",
        BTreeMap::from([(
            "peelDirection".to_string(),
            DirectionMapper.value_schema(),
        )]),
        move |args| {
            let direction = DirectionMapper.deserialize(
                args.get("peelDirection")
                    .unwrap_or(&SerializedValue::Text("fromStem".to_string())),
            )?;
            Ok(Arc::new(PeelBanana { direction, farm }) as Arc<dyn Activity>)
        },
    ))?;

    builder.activity_type(ActivityType::new(
        "BiteBanana",
        BTreeMap::from([("biteSize".to_string(), ValueSchema::Real)]),
        move |args| {
            let size = real_arg(args, "biteSize").unwrap_or(1.0);
            Ok(Arc::new(BiteBanana { size, farm }) as Arc<dyn Activity>)
        },
    ))?;

    builder.activity_type(ActivityType::new(
        "GrowBanana",
        BTreeMap::from([
            ("quantity".to_string(), ValueSchema::Real),
            ("growingDuration".to_string(), ValueSchema::Duration),
        ]),
        move |args| {
            let quantity = real_arg(args, "quantity")?;
            let growing_duration = DurationMapper.deserialize(
                args.get("growingDuration")
                    .ok_or_else(|| "missing argument `growingDuration`".to_string())?,
            )?;
            Ok(Arc::new(GrowBanana {
                quantity,
                growing_duration,
                farm,
            }) as Arc<dyn Activity>)
        },
    ))?;

    builder.activity_type(ActivityType::new(
        "GrowBunch",
        BTreeMap::from([
            ("quantity".to_string(), ValueSchema::Real),
            ("count".to_string(), ValueSchema::Int),
        ]),
        move |args| {
            let quantity = real_arg(args, "quantity")?;
            let count = int_arg(args, "count")?;
            if count < 1 {
                return Err(format!("bunch count must be at least 1, got {count}"));
            }
            Ok(Arc::new(GrowBunch {
                quantity,
                count,
                farm,
            }) as Arc<dyn Activity>)
        },
    ))?;

    builder.activity_type(ActivityType::new(
        "ChangeProducer",
        BTreeMap::from([("producer".to_string(), ValueSchema::Text)]),
        move |args| {
            let producer = text_arg(args, "producer").unwrap_or_else(|_| "Dole".to_string());
            Ok(Arc::new(ChangeProducer { producer, farm }) as Arc<dyn Activity>)
        },
    ))?;

    builder.activity_type(ActivityType::new(
        "RottenBanana",
        BTreeMap::new(),
        move |_| Ok(Arc::new(RottenBanana { farm }) as Arc<dyn Activity>),
    ))?;

    Ok((builder.build(), farm))
}
