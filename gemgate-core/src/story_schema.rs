//! Built-in schema for cinematic story design requests.

use serde_json::{json, Value};

/// Fields every story design must contain
pub const REQUIRED_FIELDS: [&str; 15] = [
    "illustration_style",
    "story_title",
    "youtube_video_title",
    "youtube_video_description",
    "youtube_video_hashtags",
    "cover_image_description",
    "narrator_name",
    "narrator_gender",
    "narrator_voice_id",
    "cover_image_characters",
    "character_list",
    "chapter_list",
    "scene_list",
    "scene_audio_language",
    "tweet",
];

/// JSON Schema for a full story design: metadata for publishing, a cast of
/// characters, chapters, and narrated scenes with image prompts.
pub fn cinematic_story_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "illustration_style": {
                "type": "string",
                "description": "Illustration style for the whole story, e.g. Traditional Chinese Ink Illustration"
            },
            "story_title": {
                "type": "string",
                "description": "Story title taken from the content or invented; no characters that are unsafe in file or folder names"
            },
            "youtube_video_title": {
                "type": "string",
                "description": "Video title with eye-catching keywords separated by |, author name if known, under 100 characters"
            },
            "youtube_video_description": {
                "type": "string",
                "description": "Video description that opens with search keywords, under 4000 characters"
            },
            "youtube_video_hashtags": {
                "type": "string",
                "description": "At most 10 lowercase hashtags separated by spaces, under 100 characters in total"
            },
            "cover_image_description": {
                "type": "string",
                "description": "Image-generation prompt for the cover, including the main character and the story title"
            },
            "narrator_name": {
                "type": "string",
                "description": "Narrator, who must be a character of the story"
            },
            "narrator_gender": {
                "type": "string",
                "enum": ["male", "female", "neutral"]
            },
            "narrator_voice_id": {
                "type": "string",
                "description": "Voice id from the supplied voice list that best matches the narrator, gender first"
            },
            "cover_image_characters": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Lowercase names from character_list shown on the cover"
            },
            "character_list": {
                "type": "array",
                "description": "Characters appearing in at least two scenes, at most 20",
                "items": {
                    "type": "object",
                    "properties": {
                        "character_number": { "type": "integer" },
                        "character_name": {
                            "type": "string",
                            "description": "Lowercase name; the first entry is the protagonist, not the narrator"
                        },
                        "character_image_description": {
                            "type": "string",
                            "description": "Image-generation prompt for this single character"
                        }
                    },
                    "required": ["character_number", "character_name", "character_image_description"]
                }
            },
            "chapter_list": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "chapter_number": { "type": "integer" },
                        "chapter_name": { "type": "string" },
                        "chapter_scene_list": {
                            "type": "array",
                            "items": { "type": "integer" }
                        }
                    },
                    "required": ["chapter_number", "chapter_name", "chapter_scene_list"]
                }
            },
            "scene_list": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "scene_number": { "type": "integer" },
                        "scene_name": { "type": "string" },
                        "scene_image_description": {
                            "type": "string",
                            "description": "Image-generation prompt for the scene"
                        },
                        "scene_major_character": {
                            "type": "string",
                            "description": "The one lowercase character in focus; never the narrator, never null"
                        },
                        "scene_other_characters": {
                            "type": "array",
                            "items": { "type": "string" }
                        },
                        "scene_audio_script": {
                            "type": "string",
                            "description": "Roughly 60 seconds of narration that does not repeat earlier scenes"
                        },
                        "is_intentional_repetition": {
                            "type": "string",
                            "enum": ["yes", "no"]
                        }
                    },
                    "required": [
                        "scene_number",
                        "scene_name",
                        "scene_image_description",
                        "scene_major_character",
                        "scene_other_characters",
                        "scene_audio_script",
                        "is_intentional_repetition"
                    ]
                }
            },
            "scene_audio_language": {
                "type": "string",
                "description": "Lowercase language of scene_audio_script"
            },
            "tweet": {
                "type": "string",
                "description": "Promotional tweet under 240 characters, leaving room for the video link"
            }
        },
        "required": REQUIRED_FIELDS
    })
}
