use crate::pipeline::{TopicRequest, VideoKind};

use super::{ScriptPlan, SegmentDescriptor, SegmentRole};

/// Deterministic template generator, the last link of the script fallback
/// chain. Fills every segment with generic topic-derived narration and
/// search terms so the pipeline always has segments to work with. Never
/// fails.
pub fn fallback_plan(request: &TopicRequest, body_count: usize) -> ScriptPlan {
    match request.kind {
        VideoKind::Long => long_plan(request, body_count),
        VideoKind::Short => short_plan(request, body_count),
    }
}

fn long_plan(request: &TopicRequest, body_count: usize) -> ScriptPlan {
    let topic = &request.topic;
    let category = if request.general_topic.is_empty() {
        "general".to_string()
    } else {
        request.general_topic.clone()
    };

    let mut segments = Vec::with_capacity(body_count + 2);

    segments.push(SegmentDescriptor {
        index: 0,
        role: SegmentRole::Intro,
        title: format!("Top {body_count} {topic}"),
        narration_text: format!(
            "Welcome to our top {body_count} video about {topic}! \
             Today we're counting down the best examples in the {category} category. \
             Let's get started!"
        ),
        search_terms: vec![topic.clone(), format!("{topic} {category}")],
        speaker: None,
    });

    // Countdown order: rank N first, rank 1 last
    for i in 0..body_count {
        let rank = body_count - i;
        segments.push(SegmentDescriptor {
            index: i + 1,
            role: SegmentRole::Body { rank: rank as u32 },
            title: format!("#{rank}: {topic} pick"),
            narration_text: format!(
                "Number {rank}. Coming in at number {rank}, we have a standout example of {topic}. \
                 This one earns its place on our list through its unique qualities and lasting \
                 popularity among fans of {category}."
            ),
            search_terms: vec![format!("{topic} {rank}"), format!("{topic} example")],
            speaker: None,
        });
    }

    segments.push(SegmentDescriptor {
        index: body_count + 1,
        role: SegmentRole::Outro,
        title: "Outro".to_string(),
        narration_text: format!(
            "Thanks for watching our countdown of the top {body_count} {topic}! \
             If you enjoyed this video, please like, comment, and subscribe for more content \
             like this."
        ),
        search_terms: vec![format!("{topic} conclusion"), topic.clone()],
        speaker: None,
    });

    ScriptPlan {
        title: format!("Top {body_count} {topic}"),
        segments,
    }
}

fn short_plan(request: &TopicRequest, scene_count: usize) -> ScriptPlan {
    let topic = &request.topic;
    let mut segments = Vec::with_capacity(scene_count);

    for index in 0..scene_count {
        let (role, title, narration_text, search_terms) = if index == 0 {
            (
                SegmentRole::Intro,
                "Hook".to_string(),
                format!("Did you know these facts about {topic}? Stick around, you won't believe the last one!"),
                vec![format!("{topic} introduction"), "attention grabbing visual".to_string()],
            )
        } else if index == scene_count - 1 {
            (
                SegmentRole::Outro,
                "Call to action".to_string(),
                "Follow for more amazing content like this!".to_string(),
                vec!["follow reminder".to_string(), format!("{topic} closeup")],
            )
        } else {
            (
                SegmentRole::Body { rank: index as u32 },
                format!("Fact {index}"),
                format!(
                    "Here's something about {topic} most people never notice. \
                     Fact number {index} is the kind of detail that changes how you see it."
                ),
                vec![format!("{topic} detail {index}"), format!("{topic} closeup")],
            )
        };

        segments.push(SegmentDescriptor {
            index,
            role,
            title,
            narration_text,
            search_terms,
            speaker: None,
        });
    }

    ScriptPlan {
        title: topic.clone(),
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn long_request() -> TopicRequest {
        TopicRequest {
            topic: "retro arcade games".to_string(),
            general_topic: "video games".to_string(),
            target_duration: Duration::from_secs(300),
            language: "english".to_string(),
            multi_speaker: false,
            kind: VideoKind::Long,
        }
    }

    #[test]
    fn test_long_plan_shape() {
        let plan = fallback_plan(&long_request(), 10);
        // 1 intro + 10 body + 1 outro
        assert_eq!(plan.segments.len(), 12);
        assert!(matches!(plan.segments[0].role, SegmentRole::Intro));
        assert!(matches!(plan.segments[11].role, SegmentRole::Outro));
        for (position, segment) in plan.segments.iter().enumerate() {
            assert_eq!(segment.index, position);
            assert!(!segment.narration_text.is_empty());
            assert!(!segment.search_terms.is_empty());
        }
    }

    #[test]
    fn test_long_plan_counts_down() {
        let plan = fallback_plan(&long_request(), 10);
        let SegmentRole::Body { rank: first } = plan.segments[1].role else {
            panic!("expected body segment");
        };
        let SegmentRole::Body { rank: last } = plan.segments[10].role else {
            panic!("expected body segment");
        };
        assert_eq!(first, 10);
        assert_eq!(last, 1);
    }

    #[test]
    fn test_template_is_deterministic() {
        let a = fallback_plan(&long_request(), 10);
        let b = fallback_plan(&long_request(), 10);
        assert_eq!(a.title, b.title);
        for (sa, sb) in a.segments.iter().zip(&b.segments) {
            assert_eq!(sa.narration_text, sb.narration_text);
            assert_eq!(sa.search_terms, sb.search_terms);
        }
    }

    #[test]
    fn test_short_plan_shape() {
        let mut request = long_request();
        request.kind = VideoKind::Short;
        let plan = fallback_plan(&request, 5);
        assert_eq!(plan.segments.len(), 5);
        assert!(matches!(plan.segments[0].role, SegmentRole::Intro));
        assert!(matches!(plan.segments[4].role, SegmentRole::Outro));
    }
}
